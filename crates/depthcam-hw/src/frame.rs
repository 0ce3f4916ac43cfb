//! Raw frames as delivered by the device driver.

use std::fmt;

/// Frame type tag delivered alongside every raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Color sensor frame (packed BGR).
    Color,
    /// Infrared amplitude frame. Produced by the driver but not published.
    Ir,
    /// Depth frame, one native-endian `f32` per pixel in millimetres.
    Depth,
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Color => "color",
            FrameType::Ir => "ir",
            FrameType::Depth => "depth",
        };
        f.write_str(name)
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// An undecoded sensor capture.
///
/// The buffer is guaranteed to hold at least `width * height * bytes_per_pixel`
/// bytes, and both that size and the row stride are representable. Dropping
/// the frame releases it; a driver that pools buffers can attach a release
/// hook which runs exactly once on drop.
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    /// Driver sequence number, if the driver provides one.
    pub sequence: u32,
    release: Option<ReleaseHook>,
}

impl RawFrame {
    /// Wrap a driver buffer, checking it is large enough for the declared dimensions.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Self, FrameError> {
        let overflow = || FrameError::DimensionsOverflow {
            width,
            height,
            bytes_per_pixel,
        };
        bytes_per_pixel.checked_mul(width).ok_or_else(overflow)?;
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(bytes_per_pixel as usize))
            .ok_or_else(overflow)?;
        if data.len() < expected {
            return Err(FrameError::BufferTooShort {
                width,
                height,
                bytes_per_pixel,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            bytes_per_pixel,
            sequence: 0,
            release: None,
        })
    }

    /// Set the driver sequence number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Attach a hook run when the frame is released.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Bytes per row of the payload.
    pub fn row_stride(&self) -> u32 {
        // Checked in `new`.
        self.bytes_per_pixel * self.width
    }

    /// Number of payload bytes covered by the declared dimensions.
    pub fn payload_len(&self) -> usize {
        // Checked in `new`.
        self.row_stride() as usize * self.height as usize
    }

    /// The payload, trimmed to the declared dimensions.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.payload_len()]
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(
        "frame buffer too short for {width}x{height}x{bytes_per_pixel}: expected {expected}, got {actual}"
    )]
    BufferTooShort {
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        expected: usize,
        actual: usize,
    },
    #[error("frame dimensions {width}x{height}x{bytes_per_pixel} overflow")]
    DimensionsOverflow {
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    },
}
