//! Calibration store: persisted calibration files with synthesized fallback.
//!
//! Calibration URLs follow camera-info-manager conventions: an empty URL
//! means uncalibrated, `file://` or a bare path points at a file, and
//! `${NAME}` expands to the camera name (e.g. `"<serial>_rgb"`).

use crate::intrinsics;
use crate::types::{CalibrationRecord, DistortionModel};
use depthcam_hw::IntrinsicParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("unsupported calibration URL: {0}")]
    UnsupportedUrl(String),
    #[error("calibration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed calibration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize calibration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persisted calibration lookup.
pub trait CalibrationSource: Send + Sync {
    /// Load the calibration for `camera_name` from `url`.
    ///
    /// `Ok(None)` means uncalibrated.
    fn load(&self, camera_name: &str, url: &str)
        -> Result<Option<CalibrationRecord>, CalibrationError>;
}

/// On-disk calibration format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalibrationFile {
    camera_name: String,
    image_width: u32,
    image_height: u32,
    distortion_model: DistortionModel,
    distortion_coefficients: [f64; 5],
    camera_matrix: [f64; 9],
    rectification_matrix: [f64; 9],
    projection_matrix: [f64; 12],
}

impl CalibrationFile {
    fn into_record(self) -> CalibrationRecord {
        CalibrationRecord {
            frame_id: String::new(),
            width: self.image_width,
            height: self.image_height,
            distortion_model: self.distortion_model,
            d: self.distortion_coefficients,
            k: self.camera_matrix,
            r: self.rectification_matrix,
            p: self.projection_matrix,
        }
    }

    fn from_record(camera_name: &str, record: &CalibrationRecord) -> Self {
        Self {
            camera_name: camera_name.to_string(),
            image_width: record.width,
            image_height: record.height,
            distortion_model: record.distortion_model,
            distortion_coefficients: record.d,
            camera_matrix: record.k,
            rectification_matrix: record.r,
            projection_matrix: record.p,
        }
    }
}

/// Resolve a calibration URL to a file path. `Ok(None)` for an empty URL.
pub fn resolve_url(url: &str, camera_name: &str) -> Result<Option<PathBuf>, CalibrationError> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(None);
    }
    let expanded = url.replace("${NAME}", camera_name);
    if let Some(path) = expanded.strip_prefix("file://") {
        return Ok(Some(PathBuf::from(path)));
    }
    if expanded.contains("://") {
        return Err(CalibrationError::UnsupportedUrl(expanded));
    }
    Ok(Some(PathBuf::from(expanded)))
}

/// Reads TOML calibration files from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCalibrationSource;

impl CalibrationSource for FileCalibrationSource {
    fn load(
        &self,
        camera_name: &str,
        url: &str,
    ) -> Result<Option<CalibrationRecord>, CalibrationError> {
        let Some(path) = resolve_url(url, camera_name)? else {
            return Ok(None);
        };
        if !path.exists() {
            return Err(CalibrationError::NotFound(path));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| CalibrationError::Io {
            path: path.clone(),
            source,
        })?;
        let file: CalibrationFile = toml::from_str(&text)?;
        if file.camera_name != camera_name {
            tracing::warn!(
                path = %path.display(),
                expected = camera_name,
                found = %file.camera_name,
                "calibration file camera name mismatch; loading anyway"
            );
        }
        tracing::debug!(path = %path.display(), camera_name, "loaded calibration file");
        Ok(Some(file.into_record()))
    }
}

/// Write a calibration record in the format [`FileCalibrationSource`] reads.
pub fn save_calibration(
    path: &Path,
    camera_name: &str,
    record: &CalibrationRecord,
) -> Result<(), CalibrationError> {
    let text = toml::to_string_pretty(&CalibrationFile::from_record(camera_name, record))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CalibrationError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, text).map_err(|source| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Where a resolved calibration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOrigin {
    Persisted,
    Synthesized,
}

/// Everything needed to resolve one stream's calibration.
#[derive(Debug, Clone)]
pub struct CalibrationRequest<'a> {
    /// Lookup key for persisted calibration, e.g. `"<serial>_depth"`.
    pub camera_name: &'a str,
    pub url: &'a str,
    /// Frame id assigned to the resolved record.
    pub frame_id: &'a str,
    pub reported: IntrinsicParams,
    /// Resolution used when synthesizing.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ResolvedCalibration {
    pub record: Arc<CalibrationRecord>,
    pub origin: CalibrationOrigin,
}

/// Resolves calibration once per stream at setup time.
pub struct CalibrationStore {
    source: Box<dyn CalibrationSource>,
}

impl CalibrationStore {
    pub fn new(source: Box<dyn CalibrationSource>) -> Self {
        Self { source }
    }

    /// Persisted calibration if available, else synthesized from the
    /// reported intrinsics. Unreadable files are logged and treated as
    /// uncalibrated.
    pub fn resolve(&self, request: &CalibrationRequest<'_>) -> ResolvedCalibration {
        let persisted = match self.source.load(request.camera_name, request.url) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    camera_name = request.camera_name,
                    url = request.url,
                    error = %e,
                    "failed to load calibration; falling back to device intrinsics"
                );
                None
            }
        };

        let (mut record, origin) = match persisted {
            Some(record) => (record, CalibrationOrigin::Persisted),
            None => (
                intrinsics::synthesize(&request.reported, request.width, request.height),
                CalibrationOrigin::Synthesized,
            ),
        };
        record.frame_id = request.frame_id.to_string();

        ResolvedCalibration {
            record: Arc::new(record),
            origin,
        }
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(Box::new(FileCalibrationSource))
    }
}
