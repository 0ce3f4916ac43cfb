//! Ingestion dispatcher: the driver's frame callback.
//!
//! Starts NotReady and drops every frame. [`IngestionDispatcher::mark_ready`]
//! installs the stream contexts exactly once; from then on frames are
//! converted and published. The ready state lives in a `OnceLock`, so the
//! hot path is a lock-free read and color and depth never contend.

use crate::convert::{self, DepthUnits};
use crate::publisher::StreamContext;
use crate::types::Stream;
use chrono::Utc;
use depthcam_hw::{FrameListener, FrameType, RawFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Stream contexts installed when setup completes.
pub struct Pipeline {
    pub rgb: StreamContext,
    pub depth: StreamContext,
    pub depth_units: DepthUnits,
}

impl Pipeline {
    pub fn context(&self, stream: Stream) -> &StreamContext {
        match stream {
            Stream::Rgb => &self.rgb,
            Stream::Depth => &self.depth,
        }
    }
}

/// Frame counters for frames that were not published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Dropped because the pipeline was not ready yet.
    pub dropped_not_ready: u64,
    /// Frame types this pipeline does not publish.
    pub ignored: u64,
    /// Frames that violated a conversion precondition.
    pub rejected: u64,
}

#[derive(Default)]
pub struct IngestionDispatcher {
    pipeline: OnceLock<Pipeline>,
    dropped_not_ready: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
}

impl IngestionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to Ready. Returns the pipeline back if already ready.
    pub fn mark_ready(&self, pipeline: Pipeline) -> Result<(), Pipeline> {
        self.pipeline.set(pipeline)?;
        tracing::info!("pipeline ready");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.get().is_some()
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.get()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dropped_not_ready: self.dropped_not_ready.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Handle one frame from the driver. The frame is released before
    /// returning on every path.
    pub fn on_frame(&self, frame_type: FrameType, frame: RawFrame) -> bool {
        let Some(pipeline) = self.pipeline.get() else {
            self.dropped_not_ready.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%frame_type, "pipeline not ready; dropping frame");
            return true;
        };

        let stream = match frame_type {
            FrameType::Color => Stream::Rgb,
            FrameType::Depth => Stream::Depth,
            FrameType::Ir => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%frame_type, "ignoring unsupported frame type");
                return true;
            }
        };

        let capture_time = Utc::now();
        let ctx = pipeline.context(stream);
        match convert::convert(
            stream,
            &frame,
            capture_time,
            &ctx.sample_frame_id,
            pipeline.depth_units,
        ) {
            Ok(sample) => {
                drop(frame);
                ctx.publish(sample);
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%stream, sequence = frame.sequence, error = %e, "dropping malformed frame");
            }
        }
        true
    }
}

impl FrameListener for IngestionDispatcher {
    fn on_new_frame(&self, frame_type: FrameType, frame: RawFrame) -> bool {
        self.on_frame(frame_type, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationOrigin;
    use crate::intrinsics::synthesize;
    use crate::publisher::tests::RecordingTransport;
    use crate::transport::Transport;
    use crate::types::PixelEncoding;
    use depthcam_hw::IntrinsicParams;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const RGB_TOPIC: &str = "kinect2/rgb/image_raw";
    const DEPTH_TOPIC: &str = "kinect2/depth/image_raw";

    fn context(transport: &RecordingTransport, stream: Stream, topic: &str) -> StreamContext {
        let params = IntrinsicParams {
            fx: 100.0,
            fy: 100.0,
            cx: 1.0,
            cy: 1.0,
        };
        let mut record = synthesize(&params, 2, 2);
        record.frame_id = format!("kinect2/{}_optical", stream.name());
        StreamContext::new(
            stream,
            record.frame_id.clone(),
            Arc::new(record),
            CalibrationOrigin::Synthesized,
            transport.advertise(topic, 1).unwrap(),
        )
    }

    fn pipeline(transport: &RecordingTransport) -> Pipeline {
        Pipeline {
            rgb: context(transport, Stream::Rgb, RGB_TOPIC),
            depth: context(transport, Stream::Depth, DEPTH_TOPIC),
            depth_units: DepthUnits::Meters,
        }
    }

    fn tracked_frame(data: Vec<u8>, bpp: u32, released: &Arc<AtomicUsize>) -> RawFrame {
        let counter = Arc::clone(released);
        RawFrame::new(data, 2, 1, bpp)
            .unwrap()
            .with_release_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
    }

    fn depth_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_not_ready_drops_everything() {
        let transport = RecordingTransport::default();
        let dispatcher = IngestionDispatcher::new();
        let released = Arc::new(AtomicUsize::new(0));

        for frame_type in [FrameType::Color, FrameType::Depth, FrameType::Ir] {
            let frame = tracked_frame(vec![0u8; 8], 4, &released);
            assert!(dispatcher.on_frame(frame_type, frame));
        }

        assert!(!dispatcher.is_ready());
        assert_eq!(transport.count(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.stats().dropped_not_ready, 3);
    }

    #[test]
    fn test_ready_publishes_one_pair_per_known_frame() {
        let transport = RecordingTransport::default();
        let dispatcher = IngestionDispatcher::new();
        dispatcher.mark_ready(pipeline(&transport)).ok().unwrap();
        let released = Arc::new(AtomicUsize::new(0));

        let color = tracked_frame(vec![1, 2, 3, 4, 5, 6], 3, &released);
        dispatcher.on_frame(FrameType::Color, color);
        let depth = tracked_frame(depth_bytes(&[1000.0, 2500.0]), 4, &released);
        dispatcher.on_frame(FrameType::Depth, depth);
        let ir = tracked_frame(vec![0u8; 8], 4, &released);
        dispatcher.on_frame(FrameType::Ir, ir);

        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert_eq!(transport.count(), 2);

        let rgb = transport.messages(RGB_TOPIC);
        assert_eq!(rgb.len(), 1);
        assert_eq!(rgb[0].image.encoding, PixelEncoding::Bgr8);
        assert_eq!(rgb[0].image.data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(rgb[0].image.frame_id, "kinect2/rgb_optical");
        assert_eq!(rgb[0].info.stamp, rgb[0].image.capture_time);
        assert_eq!(rgb[0].info.calibration.frame_id, "kinect2/rgb_optical");

        let depth = transport.messages(DEPTH_TOPIC);
        assert_eq!(depth.len(), 1);
        assert_eq!(depth[0].image.as_f32().unwrap(), vec![1.0, 2.5]);
        assert_eq!(depth[0].image.frame_id, "kinect2/depth_optical");
        assert_eq!(depth[0].info.stamp, depth[0].image.capture_time);

        let stats = dispatcher.stats();
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.dropped_not_ready, 0);
        assert_eq!(dispatcher.pipeline().unwrap().rgb.published(), 1);
    }

    #[test]
    fn test_malformed_depth_is_released_not_published() {
        let transport = RecordingTransport::default();
        let dispatcher = IngestionDispatcher::new();
        dispatcher.mark_ready(pipeline(&transport)).ok().unwrap();
        let released = Arc::new(AtomicUsize::new(0));

        let frame = tracked_frame(vec![0u8; 4], 2, &released);
        dispatcher.on_frame(FrameType::Depth, frame);

        assert_eq!(transport.count(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().rejected, 1);
    }

    #[test]
    fn test_mark_ready_only_once() {
        let transport = RecordingTransport::default();
        let dispatcher = IngestionDispatcher::new();
        assert!(dispatcher.mark_ready(pipeline(&transport)).is_ok());
        assert!(dispatcher.mark_ready(pipeline(&transport)).is_err());
    }

    #[test]
    fn test_concurrent_streams() {
        let transport = RecordingTransport::default();
        let dispatcher = Arc::new(IngestionDispatcher::new());
        dispatcher.mark_ready(pipeline(&transport)).ok().unwrap();
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = [FrameType::Color, FrameType::Depth]
            .into_iter()
            .map(|frame_type| {
                let dispatcher = Arc::clone(&dispatcher);
                let released = Arc::clone(&released);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let (data, bpp) = match frame_type {
                            FrameType::Color => (vec![9u8; 6], 3),
                            _ => (depth_bytes(&[10.0, 20.0]), 4),
                        };
                        let frame = tracked_frame(data, bpp, &released);
                        dispatcher.on_frame(frame_type, frame);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(released.load(Ordering::SeqCst), 100);
        assert_eq!(transport.messages(RGB_TOPIC).len(), 50);
        assert_eq!(transport.messages(DEPTH_TOPIC).len(), 50);
    }

    #[test]
    fn test_registered_as_frame_listener() {
        let transport = RecordingTransport::default();
        let dispatcher = Arc::new(IngestionDispatcher::new());
        dispatcher.mark_ready(pipeline(&transport)).ok().unwrap();
        let listener: Arc<dyn FrameListener> = dispatcher.clone();
        let frame = RawFrame::new(vec![0u8; 6], 2, 1, 3).unwrap();
        assert!(listener.on_new_frame(FrameType::Color, frame));
        assert_eq!(transport.count(), 1);
    }
}
