//! Raw frame → image sample conversion.

use crate::types::{ImageSample, PixelEncoding, Stream};
use chrono::{DateTime, Utc};
use depthcam_hw::RawFrame;
use thiserror::Error;

const MILLIMETRES_PER_METRE: f32 = 1000.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvertError {
    #[error("depth frame must have 4 bytes per pixel, got {0}")]
    DepthLayout(u32),
}

/// Unit of published depth values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthUnits {
    /// Driver millimetres divided by 1000.
    #[default]
    Meters,
    /// Driver millimetres passed through unchanged.
    Millimeters,
}

impl std::str::FromStr for DepthUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "meters" | "metres" => Ok(DepthUnits::Meters),
            "mm" | "millimeters" | "millimetres" => Ok(DepthUnits::Millimeters),
            other => Err(format!("unknown depth unit '{other}' (expected m or mm)")),
        }
    }
}

/// Convert a frame of the given stream into an image sample.
pub fn convert(
    stream: Stream,
    frame: &RawFrame,
    capture_time: DateTime<Utc>,
    frame_id: &str,
    units: DepthUnits,
) -> Result<ImageSample, ConvertError> {
    match stream {
        Stream::Rgb => Ok(convert_color(frame, capture_time, frame_id)),
        Stream::Depth => convert_depth(frame, capture_time, frame_id, units),
    }
}

/// Packed BGR copy of the frame payload.
pub fn convert_color(frame: &RawFrame, capture_time: DateTime<Utc>, frame_id: &str) -> ImageSample {
    ImageSample {
        capture_time,
        frame_id: frame_id.to_string(),
        encoding: PixelEncoding::Bgr8,
        width: frame.width(),
        height: frame.height(),
        row_stride: frame.row_stride(),
        data: frame.payload().to_vec(),
    }
}

/// Single-channel float depth, scaled per `units`.
pub fn convert_depth(
    frame: &RawFrame,
    capture_time: DateTime<Utc>,
    frame_id: &str,
    units: DepthUnits,
) -> Result<ImageSample, ConvertError> {
    if frame.bytes_per_pixel() != PixelEncoding::Float32C1.bytes_per_pixel() {
        return Err(ConvertError::DepthLayout(frame.bytes_per_pixel()));
    }

    let payload = frame.payload();
    let data = match units {
        DepthUnits::Millimeters => payload.to_vec(),
        DepthUnits::Meters => {
            let mut data = Vec::with_capacity(payload.len());
            for chunk in payload.chunks_exact(4) {
                let mm = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                data.extend_from_slice(&(mm / MILLIMETRES_PER_METRE).to_ne_bytes());
            }
            data
        }
    };

    Ok(ImageSample {
        capture_time,
        frame_id: frame_id.to_string(),
        encoding: PixelEncoding::Float32C1,
        width: frame.width(),
        height: frame.height(),
        row_stride: frame.row_stride(),
        data,
    })
}
