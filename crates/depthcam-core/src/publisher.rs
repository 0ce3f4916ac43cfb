//! Per-stream publishing: pairs each sample with its stamped calibration.

use crate::calibration::CalibrationOrigin;
use crate::transport::PublishChannel;
use crate::types::{CalibrationRecord, ImageSample, Stream, StampedCalibration};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stamp a calibration with the capture time of the sample it accompanies.
pub fn stamp(calibration: &Arc<CalibrationRecord>, capture_time: DateTime<Utc>) -> StampedCalibration {
    StampedCalibration {
        stamp: capture_time,
        calibration: Arc::clone(calibration),
    }
}

/// Everything one stream needs at publish time. Built once during setup.
pub struct StreamContext {
    pub stream: Stream,
    /// Frame id written into this stream's image samples.
    pub sample_frame_id: String,
    pub calibration: Arc<CalibrationRecord>,
    pub origin: CalibrationOrigin,
    channel: Box<dyn PublishChannel>,
    published: AtomicU64,
}

impl StreamContext {
    pub fn new(
        stream: Stream,
        sample_frame_id: String,
        calibration: Arc<CalibrationRecord>,
        origin: CalibrationOrigin,
        channel: Box<dyn PublishChannel>,
    ) -> Self {
        Self {
            stream,
            sample_frame_id,
            calibration,
            origin,
            channel,
            published: AtomicU64::new(0),
        }
    }

    /// Hand the sample and its stamped calibration to the transport.
    pub fn publish(&self, sample: ImageSample) {
        let info = stamp(&self.calibration, sample.capture_time);
        self.channel.publish(sample, info);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of samples handed to the transport so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn topic(&self) -> &str {
        self.channel.topic()
    }

    /// Withdraw this stream's topic from the transport.
    pub fn close(&self) {
        self.channel.close();
    }
}
