//! Synthetic Kinect v2-like device for running the pipeline without hardware.
//!
//! Runs one capture thread for the color sensor and one for the IR/depth
//! sensor, matching how the real driver delivers the two independently.

use crate::device::{Device, DeviceError, FrameListener, IntrinsicParams};
use crate::frame::{FrameType, RawFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub const DEFAULT_SERIAL: &str = "000000000000";
const FIRMWARE_VERSION: &str = "synthetic-1.0";

pub const COLOR_WIDTH: u32 = 1920;
pub const COLOR_HEIGHT: u32 = 1080;
const COLOR_BPP: u32 = 3;

pub const DEPTH_WIDTH: u32 = 512;
pub const DEPTH_HEIGHT: u32 = 424;
const DEPTH_BPP: u32 = 4;

/// Simulated scene: a tilted plane between these distances (mm).
const DEPTH_NEAR_MM: f32 = 800.0;
const DEPTH_FAR_MM: f32 = 4500.0;

const COLOR_PARAMS: IntrinsicParams = IntrinsicParams {
    fx: 1081.37,
    fy: 1081.37,
    cx: 959.5,
    cy: 539.5,
};

const IR_PARAMS: IntrinsicParams = IntrinsicParams {
    fx: 365.456,
    fy: 365.456,
    cx: 254.878,
    cy: 205.395,
};

pub struct SyntheticDevice {
    serial: String,
    interval: Duration,
    listener: Option<Arc<dyn FrameListener>>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SyntheticDevice {
    pub fn new(serial: &str, fps: u32) -> Self {
        Self {
            serial: serial.to_string(),
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            listener: None,
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    fn spawn_capture<F>(
        &self,
        name: &str,
        listener: Arc<dyn FrameListener>,
        mut produce: F,
    ) -> Result<JoinHandle<()>, DeviceError>
    where
        F: FnMut(u32, &dyn FrameListener) + Send + 'static,
    {
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                tracing::debug!("capture thread started");
                let mut sequence = 0u32;
                while running.load(Ordering::Acquire) {
                    produce(sequence, listener.as_ref());
                    sequence = sequence.wrapping_add(1);
                    std::thread::sleep(interval);
                }
                tracing::debug!("capture thread exiting");
            })
            .map_err(|e| DeviceError::StartFailed(format!("failed to spawn {name}: {e}")))
    }

    fn spawn_captures(&mut self, listener: Arc<dyn FrameListener>) -> Result<(), DeviceError> {
        let color = self.spawn_capture("depthcam-color", Arc::clone(&listener), |seq, l| {
            deliver(
                l,
                FrameType::Color,
                color_pattern(seq),
                COLOR_WIDTH,
                COLOR_HEIGHT,
                COLOR_BPP,
                seq,
            );
        })?;
        self.threads.push(color);

        let depth = self.spawn_capture("depthcam-depth", listener, |seq, l| {
            deliver(
                l,
                FrameType::Ir,
                ir_pattern(seq),
                DEPTH_WIDTH,
                DEPTH_HEIGHT,
                DEPTH_BPP,
                seq,
            );
            deliver(
                l,
                FrameType::Depth,
                depth_pattern(),
                DEPTH_WIDTH,
                DEPTH_HEIGHT,
                DEPTH_BPP,
                seq,
            );
        })?;
        self.threads.push(depth);

        Ok(())
    }
}

/// Packed BGR test pattern that shifts with the sequence number.
pub fn color_pattern(sequence: u32) -> Vec<u8> {
    let pixels = (COLOR_WIDTH * COLOR_HEIGHT) as usize;
    let mut data = Vec::with_capacity(pixels * COLOR_BPP as usize);
    let shift = (sequence % 256) as usize;
    for i in 0..pixels {
        let x = i % COLOR_WIDTH as usize;
        let y = i / COLOR_WIDTH as usize;
        data.push(((x + shift) % 256) as u8);
        data.push(((y + shift) % 256) as u8);
        data.push(((x + y) % 256) as u8);
    }
    data
}

/// Depth in millimetres for a plane tilted along the x axis.
pub fn depth_pattern() -> Vec<u8> {
    let mut data = Vec::with_capacity((DEPTH_WIDTH * DEPTH_HEIGHT * DEPTH_BPP) as usize);
    for _y in 0..DEPTH_HEIGHT {
        for x in 0..DEPTH_WIDTH {
            let t = x as f32 / (DEPTH_WIDTH - 1) as f32;
            let mm = DEPTH_NEAR_MM + t * (DEPTH_FAR_MM - DEPTH_NEAR_MM);
            data.extend_from_slice(&mm.to_ne_bytes());
        }
    }
    data
}

fn ir_pattern(sequence: u32) -> Vec<u8> {
    let amplitude = (sequence % 65_536) as f32;
    (0..DEPTH_WIDTH * DEPTH_HEIGHT)
        .flat_map(|_| amplitude.to_ne_bytes())
        .collect()
}

fn deliver(
    listener: &dyn FrameListener,
    frame_type: FrameType,
    data: Vec<u8>,
    width: u32,
    height: u32,
    bpp: u32,
    sequence: u32,
) {
    match RawFrame::new(data, width, height, bpp) {
        Ok(frame) => {
            listener.on_new_frame(frame_type, frame.with_sequence(sequence));
        }
        Err(e) => tracing::error!(error = %e, %frame_type, "synthetic frame rejected"),
    }
}

impl Device for SyntheticDevice {
    fn serial_number(&self) -> &str {
        &self.serial
    }

    fn firmware_version(&self) -> &str {
        FIRMWARE_VERSION
    }

    fn color_params(&self) -> IntrinsicParams {
        COLOR_PARAMS
    }

    fn ir_params(&self) -> IntrinsicParams {
        IR_PARAMS
    }

    fn resolution(&self, frame_type: FrameType) -> (u32, u32) {
        match frame_type {
            FrameType::Color => (COLOR_WIDTH, COLOR_HEIGHT),
            FrameType::Ir | FrameType::Depth => (DEPTH_WIDTH, DEPTH_HEIGHT),
        }
    }

    fn set_frame_listener(&mut self, listener: Arc<dyn FrameListener>) {
        self.listener = Some(listener);
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(DeviceError::AlreadyStarted);
        }
        let Some(listener) = self.listener.clone() else {
            self.running.store(false, Ordering::Release);
            return Err(DeviceError::NoListener);
        };

        if let Err(e) = self.spawn_captures(listener) {
            // Join any capture thread that did start and clear `running`.
            let _ = self.stop();
            return Err(e);
        }

        tracing::info!(serial = %self.serial, interval = ?self.interval, "synthetic device started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
