//! depthcam-core — Depth camera frame pipeline.
//!
//! Resolves per-stream calibration (persisted or synthesized from device
//! intrinsics), converts raw color and depth frames into typed image
//! samples, and publishes each sample with its stamped calibration.

pub mod calibration;
pub mod convert;
pub mod dispatcher;
pub mod intrinsics;
pub mod node;
pub mod publisher;
pub mod transport;
pub mod types;

pub use calibration::{CalibrationSource, CalibrationStore, FileCalibrationSource};
pub use convert::DepthUnits;
pub use dispatcher::IngestionDispatcher;
pub use node::{CameraNode, CompatMode, NodeError, NodeSettings, NodeStatus};
pub use transport::{BroadcastTransport, CameraMessage, PublishChannel, Transport};
pub use types::{CalibrationRecord, ImageSample, PixelEncoding, StampedCalibration, Stream};
