use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The two published streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Rgb,
    Depth,
}

impl Stream {
    pub const ALL: [Stream; 2] = [Stream::Rgb, Stream::Depth];

    /// Short name used in topics, frame ids and calibration names.
    pub fn name(self) -> &'static str {
        match self {
            Stream::Rgb => "rgb",
            Stream::Depth => "depth",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb" | "color" => Ok(Stream::Rgb),
            "depth" => Ok(Stream::Depth),
            other => Err(format!("unknown stream '{other}' (expected rgb or depth)")),
        }
    }
}

/// Lens distortion model tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistortionModel {
    /// Pinhole with radial/tangential terms (k1, k2, t1, t2, k3).
    PlumbBob,
}

/// Intrinsic calibration of one sensor stream.
///
/// Matrices are row-major. `k` is 3x3, `r` is 3x3, `p` is 3x4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub distortion_model: DistortionModel,
    pub d: [f64; 5],
    pub k: [f64; 9],
    pub r: [f64; 9],
    pub p: [f64; 12],
}

impl CalibrationRecord {
    pub fn fx(&self) -> f64 {
        self.k[0]
    }

    pub fn fy(&self) -> f64 {
        self.k[4]
    }

    pub fn cx(&self) -> f64 {
        self.k[2]
    }

    pub fn cy(&self) -> f64 {
        self.k[5]
    }
}

/// A calibration record carrying the capture time of the sample it accompanies.
#[derive(Debug, Clone)]
pub struct StampedCalibration {
    pub stamp: DateTime<Utc>,
    pub calibration: Arc<CalibrationRecord>,
}

/// Pixel layout of an image sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelEncoding {
    /// 8-bit blue, green, red.
    Bgr8,
    /// One 32-bit float per pixel.
    Float32C1,
}

impl PixelEncoding {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelEncoding::Bgr8 => 3,
            PixelEncoding::Float32C1 => 4,
        }
    }

    /// Conventional encoding string ("bgr8", "32FC1").
    pub fn as_str(self) -> &'static str {
        match self {
            PixelEncoding::Bgr8 => "bgr8",
            PixelEncoding::Float32C1 => "32FC1",
        }
    }
}

/// A converted, timestamped image.
#[derive(Debug, Clone)]
pub struct ImageSample {
    pub capture_time: DateTime<Utc>,
    pub frame_id: String,
    pub encoding: PixelEncoding,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub row_stride: u32,
    pub data: Vec<u8>,
}

impl ImageSample {
    /// Decode the payload of a `Float32C1` sample.
    pub fn as_f32(&self) -> Option<Vec<f32>> {
        if self.encoding != PixelEncoding::Float32C1 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}
