use serde::{Deserialize, Serialize};

/// Pixel formats the sensor can deliver.
///
/// The spellings used by `FromStr`/`Display` are the HTTP parameter values;
/// the file extension is the deterministic mapping used for artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Jpeg,
    Rgb565,
    #[serde(rename = "gray")]
    Gray8,
    Yuv422,
}

impl PixelFormat {
    pub fn file_extension(&self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpg",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Gray8 => "gray",
            PixelFormat::Yuv422 => "yuv",
        }
    }

    pub fn from_extension(ext: &str) -> Option<PixelFormat> {
        match ext {
            "jpg" => Some(PixelFormat::Jpeg),
            "rgb565" => Some(PixelFormat::Rgb565),
            "gray" => Some(PixelFormat::Gray8),
            "yuv" => Some(PixelFormat::Yuv422),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Gray8 => "gray",
            PixelFormat::Yuv422 => "yuv422",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(self.name())
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = ();

    fn from_str(val: &str) -> Result<PixelFormat, ()> {
        match val {
            "jpeg" => Ok(PixelFormat::Jpeg),
            "rgb565" => Ok(PixelFormat::Rgb565),
            "gray" => Ok(PixelFormat::Gray8),
            "yuv422" => Ok(PixelFormat::Yuv422),
            _ => Err(()),
        }
    }
}

/// Sensor frame sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    Qqvga,
    Qvga,
    Vga,
    Svga,
    Xga,
    Sxga,
    Uxga,
}

impl FrameSize {
    /// (width, height) in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qvga => (320, 240),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FrameSize::Qqvga => "qqvga",
            FrameSize::Qvga => "qvga",
            FrameSize::Vga => "vga",
            FrameSize::Svga => "svga",
            FrameSize::Xga => "xga",
            FrameSize::Sxga => "sxga",
            FrameSize::Uxga => "uxga",
        }
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(self.name())
    }
}

impl std::str::FromStr for FrameSize {
    type Err = ();

    fn from_str(val: &str) -> Result<FrameSize, ()> {
        match val {
            "qqvga" => Ok(FrameSize::Qqvga),
            "qvga" => Ok(FrameSize::Qvga),
            "vga" => Ok(FrameSize::Vga),
            "svga" => Ok(FrameSize::Svga),
            "xga" => Ok(FrameSize::Xga),
            "sxga" => Ok(FrameSize::Sxga),
            "uxga" => Ok(FrameSize::Uxga),
            _ => Err(()),
        }
    }
}

#[test]
fn extension_round_trip() {
    for fmt in [
        PixelFormat::Jpeg,
        PixelFormat::Rgb565,
        PixelFormat::Gray8,
        PixelFormat::Yuv422,
    ] {
        assert_eq!(PixelFormat::from_extension(fmt.file_extension()), Some(fmt));
    }
    assert_eq!(PixelFormat::from_extension("png"), None);
}

#[test]
fn name_round_trip() {
    for fmt in [
        PixelFormat::Jpeg,
        PixelFormat::Rgb565,
        PixelFormat::Gray8,
        PixelFormat::Yuv422,
    ] {
        assert_eq!(fmt.to_string().parse::<PixelFormat>(), Ok(fmt));
    }
    for size in [
        FrameSize::Qqvga,
        FrameSize::Qvga,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Sxga,
        FrameSize::Uxga,
    ] {
        assert_eq!(size.to_string().parse::<FrameSize>(), Ok(size));
    }
}

#[test]
fn serde_spellings_match_fromstr() {
    let fmt: PixelFormat = serde_json::from_str("\"gray\"").unwrap();
    assert_eq!(fmt, PixelFormat::Gray8);
    let size: FrameSize = serde_json::from_str("\"qvga\"").unwrap();
    assert_eq!(size, FrameSize::Qvga);
}
