//! Device driver boundary.
//!
//! A [`Device`] owns the physical sensor. It reports per-stream intrinsics
//! and resolutions, and pushes every captured frame into a registered
//! [`FrameListener`] from its own capture thread(s).

use crate::frame::{FrameType, RawFrame};
use crate::synthetic::SyntheticDevice;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device already started")]
    AlreadyStarted,
    #[error("device start failed: {0}")]
    StartFailed(String),
    #[error("no frame listener registered")]
    NoListener,
}

/// Focal lengths and principal point reported by the device for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicParams {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Receives frames from the driver.
///
/// Called on the driver's capture thread; implementations must return
/// quickly and never block. Ownership of the frame passes to the listener.
/// The return value tells the driver the frame was consumed.
pub trait FrameListener: Send + Sync {
    fn on_new_frame(&self, frame_type: FrameType, frame: RawFrame) -> bool;
}

impl<F> FrameListener for F
where
    F: Fn(FrameType, RawFrame) -> bool + Send + Sync,
{
    fn on_new_frame(&self, frame_type: FrameType, frame: RawFrame) -> bool {
        self(frame_type, frame)
    }
}

/// A connected depth camera.
pub trait Device: Send {
    fn serial_number(&self) -> &str;
    fn firmware_version(&self) -> &str;

    /// Factory intrinsics of the color sensor.
    fn color_params(&self) -> IntrinsicParams;
    /// Factory intrinsics of the IR/depth sensor.
    fn ir_params(&self) -> IntrinsicParams;

    /// Native `(width, height)` of the given stream.
    fn resolution(&self, frame_type: FrameType) -> (u32, u32);

    /// Register the listener receiving color, IR and depth frames.
    fn set_frame_listener(&mut self, listener: Arc<dyn FrameListener>);

    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
}

/// Open a device by spec string.
///
/// `synthetic` or `synthetic:<serial>` opens a [`SyntheticDevice`] running
/// at `fps`. Anything else is reported as not found.
pub fn open_device(spec: &str, fps: u32) -> Result<Box<dyn Device>, DeviceError> {
    let spec = spec.trim();
    let serial = match spec.split_once(':') {
        Some(("synthetic", serial)) if !serial.is_empty() => serial,
        None if spec == "synthetic" => crate::synthetic::DEFAULT_SERIAL,
        _ => return Err(DeviceError::DeviceNotFound(spec.to_string())),
    };

    let device = SyntheticDevice::new(serial, fps);
    tracing::info!(
        spec,
        serial = device.serial_number(),
        firmware = device.firmware_version(),
        "opened device"
    );
    Ok(Box::new(device))
}
