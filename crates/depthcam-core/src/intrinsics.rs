//! Calibration synthesis from device-reported intrinsics.
//!
//! Used when no persisted calibration exists for a stream. The result is an
//! ideal pinhole model: no distortion, no rectification, `P = [K | 0]`.

use crate::types::{CalibrationRecord, DistortionModel};
use depthcam_hw::IntrinsicParams;

/// Native color resolution of a Kinect v2. Legacy mode synthesizes both
/// streams at this size.
pub const LEGACY_WIDTH: u32 = 1920;
pub const LEGACY_HEIGHT: u32 = 1080;

pub const IDENTITY_3X3: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Build a complete calibration record from reported focal length and
/// principal point. The frame id is left empty for the caller to assign.
pub fn synthesize(params: &IntrinsicParams, width: u32, height: u32) -> CalibrationRecord {
    let IntrinsicParams { fx, fy, cx, cy } = *params;

    #[rustfmt::skip]
    let k = [
        fx,  0.0, cx,
        0.0, fy,  cy,
        0.0, 0.0, 1.0,
    ];

    #[rustfmt::skip]
    let p = [
        k[0], k[1], k[2], 0.0,
        k[3], k[4], k[5], 0.0,
        k[6], k[7], k[8], 0.0,
    ];

    CalibrationRecord {
        frame_id: String::new(),
        width,
        height,
        distortion_model: DistortionModel::PlumbBob,
        d: [0.0; 5],
        k,
        r: IDENTITY_3X3,
        p,
    }
}
