//! depthcam-hw — Hardware boundary for depth camera capture.
//!
//! Defines the raw frame type handed over by the driver, the device and
//! listener traits the pipeline consumes, and a synthetic device that
//! produces Kinect v2-shaped color, IR and depth frames.

pub mod device;
pub mod frame;
pub mod synthetic;

pub use device::{open_device, Device, DeviceError, FrameListener, IntrinsicParams};
pub use frame::{FrameError, FrameType, RawFrame};
pub use synthetic::SyntheticDevice;
