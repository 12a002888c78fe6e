//! Scripted sensor driver for tests and bench runs without hardware.
//!
//! Records every driver call with a monotonic timestamp and supports
//! failure injection (init, frame pulls) and artificial pull latency.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use twincam_types::{monotonic_us, FrameSize, PixelFormat};

use crate::{Error, FrameBuffer, Result, SensorDriver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorOp {
    PowerUp,
    PowerDown,
    Init(PixelFormat, FrameSize),
    Deinit,
    SetFrameSize(FrameSize),
    SetParameter(String, String),
    Frame,
}

#[derive(Default)]
struct ControlState {
    ops: Vec<(i64, SensorOp)>,
    fail_next_inits: u32,
    fail_next_pulls: u32,
    pull_delay: Duration,
    outstanding_frames: usize,
}

/// Shared handle onto a [MockSensor]; usable after the sensor has moved
/// into a pipeline.
#[derive(Clone, Default)]
pub struct MockControl(Arc<Mutex<ControlState>>);

impl MockControl {
    /// All recorded driver calls, in order.
    pub fn ops(&self) -> Vec<SensorOp> {
        self.0
            .lock()
            .unwrap()
            .ops
            .iter()
            .map(|(_, op)| op.clone())
            .collect()
    }

    /// Recorded driver calls with their `monotonic_us` timestamps.
    pub fn stamped_ops(&self) -> Vec<(i64, SensorOp)> {
        self.0.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.0.lock().unwrap().ops.clear();
    }

    /// Make the next `n` `init` calls fail.
    pub fn fail_next_inits(&self, n: u32) {
        self.0.lock().unwrap().fail_next_inits = n;
    }

    /// Make the next `n` frame pulls fail.
    pub fn fail_next_pulls(&self, n: u32) {
        self.0.lock().unwrap().fail_next_pulls = n;
    }

    /// Add blocking latency to every frame pull.
    pub fn set_pull_delay(&self, delay: Duration) {
        self.0.lock().unwrap().pull_delay = delay;
    }

    /// Buffers pulled but not yet recycled.
    pub fn outstanding_frames(&self) -> usize {
        self.0.lock().unwrap().outstanding_frames
    }

    fn record(&self, op: SensorOp) {
        self.0.lock().unwrap().ops.push((monotonic_us(), op));
    }
}

pub struct MockSensor {
    ctl: MockControl,
    live: Option<(PixelFormat, FrameSize)>,
    frame_counter: u64,
}

impl MockSensor {
    pub fn new() -> (MockSensor, MockControl) {
        let ctl = MockControl::default();
        (
            MockSensor {
                ctl: ctl.clone(),
                live: None,
                frame_counter: 0,
            },
            ctl,
        )
    }
}

/// Deterministic frame content: a JPEG gets real SOI/EOI markers, raw
/// formats a small counter-stamped payload. Content only matters as far as
/// persistence must be byte-exact.
pub fn fake_frame_bytes(format: PixelFormat, size: FrameSize, counter: u64) -> Vec<u8> {
    let (width, height) = size.dimensions();
    let mut data = Vec::with_capacity(96);
    if format == PixelFormat::Jpeg {
        data.extend_from_slice(&[0xff, 0xd8]);
    }
    data.extend_from_slice(&counter.to_le_bytes());
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(format.to_string().as_bytes());
    data.resize(64, 0xa5);
    if format == PixelFormat::Jpeg {
        data.extend_from_slice(&[0xff, 0xd9]);
    }
    data
}

impl SensorDriver for MockSensor {
    fn power_up(&mut self) {
        self.ctl.record(SensorOp::PowerUp);
    }

    fn power_down(&mut self) {
        self.ctl.record(SensorOp::PowerDown);
    }

    fn init(&mut self, format: PixelFormat, size: FrameSize) -> Result<()> {
        self.ctl.record(SensorOp::Init(format, size));
        {
            let mut st = self.ctl.0.lock().unwrap();
            if st.fail_next_inits > 0 {
                st.fail_next_inits -= 1;
                return Err(Error::Init {
                    msg: "scripted init failure".to_string(),
                });
            }
        }
        self.live = Some((format, size));
        Ok(())
    }

    fn deinit(&mut self) {
        self.ctl.record(SensorOp::Deinit);
        self.live = None;
    }

    fn set_frame_size(&mut self, size: FrameSize) -> Result<()> {
        self.ctl.record(SensorOp::SetFrameSize(size));
        match self.live.as_mut() {
            Some((_, live_size)) => {
                *live_size = size;
                Ok(())
            }
            None => Err(Error::NotLive),
        }
    }

    fn set_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        self.ctl
            .record(SensorOp::SetParameter(name.to_string(), value.to_string()));
        if self.live.is_none() {
            return Err(Error::NotLive);
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<FrameBuffer> {
        // Stamp at pull start so ordering tests see when acquisition began.
        self.ctl.record(SensorOp::Frame);
        let (delay, fail) = {
            let mut st = self.ctl.0.lock().unwrap();
            let fail = st.fail_next_pulls > 0;
            if fail {
                st.fail_next_pulls -= 1;
            }
            (st.pull_delay, fail)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let (format, size) = self.live.ok_or(Error::NotLive)?;
        if fail {
            return Err(Error::Frame {
                msg: "scripted pull failure".to_string(),
            });
        }
        self.frame_counter += 1;
        self.ctl.0.lock().unwrap().outstanding_frames += 1;
        Ok(FrameBuffer {
            data: fake_frame_bytes(format, size, self.frame_counter),
            pixel_format: format,
            frame_size: size,
        })
    }

    fn recycle(&mut self, _frame: FrameBuffer) {
        let mut st = self.ctl.0.lock().unwrap();
        st.outstanding_frames = st.outstanding_frames.saturating_sub(1);
    }
}

#[test]
fn jpeg_frames_carry_markers() {
    let data = fake_frame_bytes(PixelFormat::Jpeg, FrameSize::Vga, 1);
    assert_eq!(&data[..2], &[0xff, 0xd8]);
    assert_eq!(&data[data.len() - 2..], &[0xff, 0xd9]);
    let raw = fake_frame_bytes(PixelFormat::Rgb565, FrameSize::Vga, 1);
    assert_ne!(&raw[..2], &[0xff, 0xd8]);
}

#[test]
fn scripted_pull_failure_is_transient() {
    let (mut sensor, ctl) = MockSensor::new();
    sensor.init(PixelFormat::Jpeg, FrameSize::Vga).unwrap();
    ctl.fail_next_pulls(1);
    assert!(sensor.next_frame().is_err());
    assert!(sensor.next_frame().is_ok());
}
