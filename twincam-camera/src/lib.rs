//! Camera pipeline for the twincam endpoints.
//!
//! Wraps a [SensorDriver] and owns the discipline the sensor/DMA pair
//! requires: pixel-format changes go through a full deinitialization and
//! sensor power-cycle, and every reconfiguration is followed by a warm-up
//! pass that discards the first frames.

use std::time::Duration;

use twincam_types::{FrameSize, PixelFormat};

pub mod mock;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("camera init failed: {msg}")]
    Init { msg: String },
    #[error("sensor is not initialized")]
    NotLive,
    #[error("frame pull failed: {msg}")]
    Frame { msg: String },
    #[error("sensor rejected parameter \"{name}\": {msg}")]
    Parameter { name: String, msg: String },
}

/// One frame as delivered by the sensor: an opaque byte buffer plus the
/// format it was captured under. Persisted byte-for-byte.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
}

impl FrameBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The sensor driver interface.
///
/// Implementations wrap the actual imager (and its DMA consumer). The
/// pipeline calls `init`/`deinit` as a pair and toggles the power pin
/// between them; `set_frame_size` and `set_parameter` touch sensor
/// registers only and are valid solely while initialized.
pub trait SensorDriver: Send {
    fn power_up(&mut self);
    fn power_down(&mut self);
    fn init(&mut self, format: PixelFormat, size: FrameSize) -> Result<()>;
    fn deinit(&mut self);
    fn set_frame_size(&mut self, size: FrameSize) -> Result<()>;
    fn set_parameter(&mut self, name: &str, value: &str) -> Result<()>;
    /// Synchronous (blocking) frame acquisition.
    fn next_frame(&mut self) -> Result<FrameBuffer>;
    /// Hand a buffer back for reuse. The default implementation drops it.
    fn recycle(&mut self, _frame: FrameBuffer) {}
}

/// Observable pipeline state.
///
/// `Streaming` is always JPEG. A transition between different pixel formats
/// must pass through `Uninitialized`; size changes within a format may use
/// the in-place sensor path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Uninitialized,
    Streaming(FrameSize),
    Prepared(PixelFormat, FrameSize),
    Idle(PixelFormat, FrameSize),
}

impl CameraState {
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        match self {
            CameraState::Uninitialized => None,
            CameraState::Streaming(_) => Some(PixelFormat::Jpeg),
            CameraState::Prepared(format, _) | CameraState::Idle(format, _) => Some(*format),
        }
    }

    pub fn frame_size(&self) -> Option<FrameSize> {
        match self {
            CameraState::Uninitialized => None,
            CameraState::Streaming(size)
            | CameraState::Prepared(_, size)
            | CameraState::Idle(_, size) => Some(*size),
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, CameraState::Uninitialized)
    }
}

/// Warm-up frames discarded after every reconfiguration. The first frames
/// after a reinit carry DMA residue and wrong exposure.
pub const DEFAULT_WARMUP_FRAMES: u32 = 5;

/// Settle time on either side of the PWDN toggle during a power-cycle.
/// Without the toggle the sensor can retain stale PLL state across format
/// changes.
const POWER_CYCLE_SETTLE: Duration = Duration::from_millis(5);

pub struct CameraPipeline<D: SensorDriver> {
    driver: D,
    state: CameraState,
    warmup_frames: u32,
}

impl<D: SensorDriver> CameraPipeline<D> {
    pub fn new(driver: D, warmup_frames: u32) -> Self {
        CameraPipeline {
            driver,
            state: CameraState::Uninitialized,
            warmup_frames,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn warmup_frames(&self) -> u32 {
        self.warmup_frames
    }

    /// First initialization, only valid from `Uninitialized`.
    pub fn initialize(&mut self, format: PixelFormat, size: FrameSize) -> Result<()> {
        if self.state.is_live() {
            return Err(Error::Init {
                msg: format!("initialize from {:?}", self.state),
            });
        }
        self.driver.power_up();
        self.driver.init(format, size)?;
        self.state = CameraState::Idle(format, size);
        Ok(())
    }

    /// Full deinit, PWDN power-cycle, init. The only valid path between
    /// pixel formats: the DMA side is configured at init time, and a bare
    /// sensor-register format change yields frames whose framing the DMA
    /// consumer no longer matches (seen as missing JPEG start-of-image
    /// markers).
    pub fn reinitialize(&mut self, format: PixelFormat, size: FrameSize) -> Result<()> {
        if self.state.is_live() {
            self.driver.deinit();
        }
        self.state = CameraState::Uninitialized;
        self.driver.power_down();
        std::thread::sleep(POWER_CYCLE_SETTLE);
        self.driver.power_up();
        std::thread::sleep(POWER_CYCLE_SETTLE);
        self.driver.init(format, size)?;
        self.state = CameraState::Idle(format, size);
        Ok(())
    }

    /// In-place size change. Cannot change the pixel format.
    pub fn set_size_within_format(&mut self, size: FrameSize) -> Result<()> {
        match self.state {
            CameraState::Uninitialized => Err(Error::NotLive),
            CameraState::Streaming(_) => {
                self.driver.set_frame_size(size)?;
                self.state = CameraState::Streaming(size);
                Ok(())
            }
            CameraState::Prepared(format, _) => {
                self.driver.set_frame_size(size)?;
                self.state = CameraState::Prepared(format, size);
                Ok(())
            }
            CameraState::Idle(format, _) => {
                self.driver.set_frame_size(size)?;
                self.state = CameraState::Idle(format, size);
                Ok(())
            }
        }
    }

    /// Bring the pipeline to `format`/`size`, choosing between the in-place
    /// size path (same format) and a full reinitialization (anything else).
    pub fn ensure_format(&mut self, format: PixelFormat, size: FrameSize) -> Result<()> {
        match (self.state.pixel_format(), self.state.frame_size()) {
            (Some(current), Some(current_size)) if current == format => {
                if current_size != size {
                    self.set_size_within_format(size)?;
                }
                Ok(())
            }
            (Some(_), _) => self.reinitialize(format, size),
            _ => self.initialize(format, size),
        }
    }

    /// Pull and discard `n` frames to flush stale DMA contents.
    pub fn drop_frames(&mut self, n: u32) -> Result<()> {
        if !self.state.is_live() {
            return Err(Error::NotLive);
        }
        for i in 0..n {
            match self.driver.next_frame() {
                Ok(frame) => self.driver.recycle(frame),
                Err(err) => tracing::warn!("discarding warm-up frame {i}: {err}"),
            }
        }
        Ok(())
    }

    /// [Self::drop_frames] with the configured warm-up count.
    pub fn warm_up(&mut self) -> Result<()> {
        let n = self.warmup_frames;
        self.drop_frames(n)
    }

    pub fn pull_frame(&mut self) -> Result<FrameBuffer> {
        if !self.state.is_live() {
            return Err(Error::NotLive);
        }
        self.driver.next_frame()
    }

    pub fn return_frame(&mut self, frame: FrameBuffer) {
        self.driver.recycle(frame);
    }

    /// Sensor-register update. Never changes format or DMA state.
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        if !self.state.is_live() {
            return Err(Error::NotLive);
        }
        self.driver.set_parameter(name, value)
    }

    /// Mark the live JPEG pipeline as serving the stream loop.
    ///
    /// Panics on a non-JPEG state: that would mean the restore discipline
    /// was violated, and there is no recovery short of a restart.
    pub fn mark_streaming(&mut self) {
        match self.state {
            CameraState::Idle(PixelFormat::Jpeg, size)
            | CameraState::Prepared(PixelFormat::Jpeg, size)
            | CameraState::Streaming(size) => {
                self.state = CameraState::Streaming(size);
            }
            other => panic!("cannot stream from camera state {other:?}"),
        }
    }

    /// Mark the live pipeline as armed for capture.
    pub fn mark_prepared(&mut self) {
        match self.state {
            CameraState::Idle(format, size) | CameraState::Prepared(format, size) => {
                self.state = CameraState::Prepared(format, size);
            }
            other => panic!("cannot arm from camera state {other:?}"),
        }
    }

    pub fn mark_idle(&mut self) {
        self.state = match self.state {
            CameraState::Streaming(size) => CameraState::Idle(PixelFormat::Jpeg, size),
            CameraState::Prepared(format, size) | CameraState::Idle(format, size) => {
                CameraState::Idle(format, size)
            }
            CameraState::Uninitialized => CameraState::Uninitialized,
        };
    }

    pub fn shutdown(&mut self) {
        if self.state.is_live() {
            self.driver.deinit();
            self.driver.power_down();
        }
        self.state = CameraState::Uninitialized;
    }
}
