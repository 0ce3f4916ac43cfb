//! Camera node lifecycle: device start, per-stream setup, Ready transition.

use crate::calibration::{CalibrationOrigin, CalibrationRequest, CalibrationStore};
use crate::convert::DepthUnits;
use crate::dispatcher::{DispatchStats, IngestionDispatcher, Pipeline};
use crate::intrinsics::{LEGACY_HEIGHT, LEGACY_WIDTH};
use crate::publisher::StreamContext;
use crate::transport::{Transport, TransportError};
use crate::types::{CalibrationRecord, Stream};
use depthcam_hw::{Device, DeviceError, FrameType};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("pipeline already ready")]
    AlreadyReady,
}

/// Frame id and resolution behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompatMode {
    /// Each stream uses its own frame id and native resolution.
    #[default]
    Corrected,
    /// Depth samples carry the color frame id and both calibrations are
    /// synthesized at 1920x1080.
    Legacy,
}

/// Host-supplied settings.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Device name; prefixes frame ids and topics.
    pub device_name: String,
    pub rgb_info_url: String,
    pub depth_info_url: String,
    pub queue_depth: usize,
    pub depth_units: DepthUnits,
    pub compat: CompatMode,
}

impl NodeSettings {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            rgb_info_url: String::new(),
            depth_info_url: String::new(),
            queue_depth: 1,
            depth_units: DepthUnits::default(),
            compat: CompatMode::default(),
        }
    }

    pub fn info_url(&self, stream: Stream) -> &str {
        match stream {
            Stream::Rgb => &self.rgb_info_url,
            Stream::Depth => &self.depth_info_url,
        }
    }

    pub fn frame_id(&self, stream: Stream) -> String {
        format!("{}/{}_optical", self.device_name, stream.name())
    }

    pub fn topic(&self, stream: Stream) -> String {
        format!("{}/{}/image_raw", self.device_name, stream.name())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream: Stream,
    pub topic: String,
    pub frame_id: String,
    pub calibrated: bool,
    pub width: u32,
    pub height: u32,
    pub published: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub serial: String,
    pub firmware: String,
    pub ready: bool,
    pub streams: Vec<StreamStatus>,
    pub dropped_not_ready: u64,
    pub ignored: u64,
    pub rejected: u64,
}

/// A running camera: device, dispatcher and both stream contexts.
pub struct CameraNode {
    device: Box<dyn Device>,
    dispatcher: Arc<IngestionDispatcher>,
    serial: String,
    firmware: String,
    running: bool,
}

impl CameraNode {
    /// Start the device and bring both streams up.
    ///
    /// The device starts delivering before setup finishes; those frames are
    /// dropped by the dispatcher. Any failure stops the device again.
    pub fn start(
        mut device: Box<dyn Device>,
        transport: &dyn Transport,
        store: &CalibrationStore,
        settings: &NodeSettings,
    ) -> Result<Self, NodeError> {
        let dispatcher = Arc::new(IngestionDispatcher::new());
        device.set_frame_listener(dispatcher.clone());
        device.start()?;

        let serial = device.serial_number().to_string();
        let firmware = device.firmware_version().to_string();
        tracing::info!(%serial, %firmware, "connected to depth camera");

        let pipeline = match setup_pipeline(device.as_ref(), transport, store, settings) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                if let Err(stop_err) = device.stop() {
                    tracing::warn!(error = %stop_err, "failed to stop device after setup error");
                }
                return Err(e);
            }
        };
        dispatcher
            .mark_ready(pipeline)
            .map_err(|_| NodeError::AlreadyReady)?;

        Ok(Self {
            device,
            dispatcher,
            serial,
            firmware,
            running: true,
        })
    }

    /// Stop frame delivery and withdraw both topics. Safe to call more than once.
    pub fn stop(&mut self) -> Result<(), NodeError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        let stopped = self.device.stop();
        if let Some(pipeline) = self.dispatcher.pipeline() {
            for stream in Stream::ALL {
                pipeline.context(stream).close();
            }
        }
        stopped?;
        tracing::info!(serial = %self.serial, "camera stopped");
        Ok(())
    }

    pub fn dispatcher(&self) -> &Arc<IngestionDispatcher> {
        &self.dispatcher
    }

    pub fn calibration(&self, stream: Stream) -> Option<Arc<CalibrationRecord>> {
        self.dispatcher
            .pipeline()
            .map(|p| Arc::clone(&p.context(stream).calibration))
    }

    pub fn status(&self) -> NodeStatus {
        let DispatchStats {
            dropped_not_ready,
            ignored,
            rejected,
        } = self.dispatcher.stats();
        let streams = self
            .dispatcher
            .pipeline()
            .map(|p| {
                Stream::ALL
                    .iter()
                    .map(|&s| {
                        let ctx = p.context(s);
                        StreamStatus {
                            stream: s,
                            topic: ctx.topic().to_string(),
                            frame_id: ctx.sample_frame_id.clone(),
                            calibrated: ctx.origin == CalibrationOrigin::Persisted,
                            width: ctx.calibration.width,
                            height: ctx.calibration.height,
                            published: ctx.published(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        NodeStatus {
            serial: self.serial.clone(),
            firmware: self.firmware.clone(),
            ready: self.dispatcher.is_ready() && self.running,
            streams,
            dropped_not_ready,
            ignored,
            rejected,
        }
    }
}

impl Drop for CameraNode {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop camera on drop");
        }
    }
}

fn setup_pipeline(
    device: &dyn Device,
    transport: &dyn Transport,
    store: &CalibrationStore,
    settings: &NodeSettings,
) -> Result<Pipeline, NodeError> {
    Ok(Pipeline {
        rgb: setup_stream(device, transport, store, settings, Stream::Rgb)?,
        depth: setup_stream(device, transport, store, settings, Stream::Depth)?,
        depth_units: settings.depth_units,
    })
}

/// Resolve calibration and advertise the channel for one stream.
fn setup_stream(
    device: &dyn Device,
    transport: &dyn Transport,
    store: &CalibrationStore,
    settings: &NodeSettings,
    stream: Stream,
) -> Result<StreamContext, NodeError> {
    let (frame_type, reported) = match stream {
        Stream::Rgb => (FrameType::Color, device.color_params()),
        Stream::Depth => (FrameType::Depth, device.ir_params()),
    };
    let (width, height) = match settings.compat {
        CompatMode::Corrected => device.resolution(frame_type),
        CompatMode::Legacy => (LEGACY_WIDTH, LEGACY_HEIGHT),
    };

    let camera_name = format!("{}_{}", device.serial_number(), stream.name());
    let frame_id = settings.frame_id(stream);
    let resolved = store.resolve(&CalibrationRequest {
        camera_name: &camera_name,
        url: settings.info_url(stream),
        frame_id: &frame_id,
        reported,
        width,
        height,
    });

    let sample_frame_id = match settings.compat {
        CompatMode::Corrected => frame_id,
        CompatMode::Legacy => settings.frame_id(Stream::Rgb),
    };

    let channel = transport.advertise(&settings.topic(stream), settings.queue_depth)?;

    tracing::info!(
        %stream,
        camera_name = %camera_name,
        topic = channel.topic(),
        frame_id = %resolved.record.frame_id,
        origin = ?resolved.origin,
        width = resolved.record.width,
        height = resolved.record.height,
        fx = resolved.record.fx(),
        fy = resolved.record.fy(),
        cx = resolved.record.cx(),
        cy = resolved.record.cy(),
        "stream configured"
    );

    Ok(StreamContext::new(
        stream,
        sample_frame_id,
        resolved.record,
        resolved.origin,
        channel,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::save_calibration;
    use crate::intrinsics::synthesize;
    use crate::publisher::tests::RecordingTransport;
    use crate::transport::{BroadcastTransport, PublishChannel};
    use depthcam_hw::{FrameListener, IntrinsicParams, RawFrame};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const COLOR: IntrinsicParams = IntrinsicParams {
        fx: 1081.37,
        fy: 1081.37,
        cx: 959.5,
        cy: 539.5,
    };
    const IR: IntrinsicParams = IntrinsicParams {
        fx: 365.456,
        fy: 365.456,
        cx: 254.878,
        cy: 205.395,
    };

    /// Device stand-in: delivers one early frame from `start` and lets
    /// the test push more through the registered listener.
    #[derive(Default)]
    struct FakeDevice {
        listener: Arc<Mutex<Option<Arc<dyn FrameListener>>>>,
        stopped: Arc<AtomicBool>,
    }

    impl FakeDevice {
        fn handles(&self) -> (Arc<Mutex<Option<Arc<dyn FrameListener>>>>, Arc<AtomicBool>) {
            (Arc::clone(&self.listener), Arc::clone(&self.stopped))
        }
    }

    impl Device for FakeDevice {
        fn serial_number(&self) -> &str {
            "500000000042"
        }
        fn firmware_version(&self) -> &str {
            "2.3.3913.0"
        }
        fn color_params(&self) -> IntrinsicParams {
            COLOR
        }
        fn ir_params(&self) -> IntrinsicParams {
            IR
        }
        fn resolution(&self, frame_type: FrameType) -> (u32, u32) {
            match frame_type {
                FrameType::Color => (1920, 1080),
                _ => (512, 424),
            }
        }
        fn set_frame_listener(&mut self, listener: Arc<dyn FrameListener>) {
            *self.listener.lock().unwrap() = Some(listener);
        }
        fn start(&mut self) -> Result<(), DeviceError> {
            let listener = self.listener.lock().unwrap().clone();
            let listener = listener.ok_or(DeviceError::NoListener)?;
            let early = RawFrame::new(vec![0u8; 6], 2, 1, 3).unwrap();
            listener.on_new_frame(FrameType::Color, early);
            Ok(())
        }
        fn stop(&mut self) -> Result<(), DeviceError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn advertise(
            &self,
            _topic: &str,
            _queue_depth: usize,
        ) -> Result<Box<dyn PublishChannel>, TransportError> {
            Err(TransportError::Unavailable("offline".into()))
        }
    }

    fn push(listener: &Arc<Mutex<Option<Arc<dyn FrameListener>>>>, t: FrameType, f: RawFrame) {
        let l = listener.lock().unwrap().clone().unwrap();
        l.on_new_frame(t, f);
    }

    #[test]
    fn test_start_synthesizes_per_stream_calibration() {
        let transport = RecordingTransport::default();
        let device = FakeDevice::default();
        let (listener, _) = device.handles();
        let settings = NodeSettings::new("kinect2");
        let node = CameraNode::start(
            Box::new(device),
            &transport,
            &CalibrationStore::default(),
            &settings,
        )
        .unwrap();

        let status = node.status();
        assert!(status.ready);
        assert_eq!(status.serial, "500000000042");
        // The frame delivered during start arrived before Ready.
        assert_eq!(status.dropped_not_ready, 1);
        assert_eq!(transport.count(), 0);

        let rgb = node.calibration(Stream::Rgb).unwrap();
        assert_eq!(rgb.frame_id, "kinect2/rgb_optical");
        assert_eq!((rgb.width, rgb.height), (1920, 1080));
        assert_eq!(rgb.k[0], COLOR.fx);

        let depth = node.calibration(Stream::Depth).unwrap();
        assert_eq!(depth.frame_id, "kinect2/depth_optical");
        assert_eq!((depth.width, depth.height), (512, 424));
        assert_eq!(depth.k[2], IR.cx);

        let depth_bytes: Vec<u8> = [1000.0f32, 2500.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        push(&listener, FrameType::Depth, RawFrame::new(depth_bytes, 2, 1, 4).unwrap());
        let messages = transport.messages("kinect2/depth/image_raw");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].image.frame_id, "kinect2/depth_optical");
        assert_eq!(messages[0].image.as_f32().unwrap(), vec![1.0, 2.5]);
        assert_eq!(node.status().streams[1].published, 1);
    }

    #[test]
    fn test_legacy_mode_reproduces_color_frame_id_and_resolution() {
        let transport = RecordingTransport::default();
        let device = FakeDevice::default();
        let (listener, _) = device.handles();
        let mut settings = NodeSettings::new("kinect2");
        settings.compat = CompatMode::Legacy;
        let node = CameraNode::start(
            Box::new(device),
            &transport,
            &CalibrationStore::default(),
            &settings,
        )
        .unwrap();

        let depth = node.calibration(Stream::Depth).unwrap();
        assert_eq!((depth.width, depth.height), (1920, 1080));
        assert_eq!(depth.frame_id, "kinect2/depth_optical");

        let frame = RawFrame::new(1000.0f32.to_ne_bytes().to_vec(), 1, 1, 4).unwrap();
        push(&listener, FrameType::Depth, frame);
        let messages = transport.messages("kinect2/depth/image_raw");
        assert_eq!(messages[0].image.frame_id, "kinect2/rgb_optical");
    }

    #[test]
    fn test_persisted_calibration_used_for_matching_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut stored = synthesize(&COLOR, 1920, 1080);
        stored.d = [0.1, -0.2, 0.0, 0.0, 0.05];
        save_calibration(
            &dir.path().join("500000000042_rgb.toml"),
            "500000000042_rgb",
            &stored,
        )
        .unwrap();

        let mut settings = NodeSettings::new("kinect2");
        let url = format!("file://{}/${{NAME}}.toml", dir.path().display());
        settings.rgb_info_url = url.clone();
        settings.depth_info_url = url;

        let node = CameraNode::start(
            Box::new(FakeDevice::default()),
            &RecordingTransport::default(),
            &CalibrationStore::default(),
            &settings,
        )
        .unwrap();

        let status = node.status();
        assert!(status.streams[0].calibrated);
        // No 500000000042_depth.toml exists.
        assert!(!status.streams[1].calibrated);
        assert_eq!(node.calibration(Stream::Rgb).unwrap().d, stored.d);
    }

    #[test]
    fn test_setup_failure_stops_device() {
        let device = FakeDevice::default();
        let (_, stopped) = device.handles();
        let result = CameraNode::start(
            Box::new(device),
            &FailingTransport,
            &CalibrationStore::default(),
            &NodeSettings::new("kinect2"),
        );
        assert!(matches!(result, Err(NodeError::Transport(_))));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_restart_on_same_transport_after_stop_and_drop() {
        let transport = BroadcastTransport::new();
        let store = CalibrationStore::default();
        let settings = NodeSettings::new("kinect2");
        let topics = vec![
            "kinect2/depth/image_raw".to_string(),
            "kinect2/rgb/image_raw".to_string(),
        ];

        let mut node =
            CameraNode::start(Box::new(FakeDevice::default()), &transport, &store, &settings)
                .unwrap();
        assert_eq!(transport.topics(), topics);
        node.stop().unwrap();
        assert!(transport.topics().is_empty());
        drop(node);

        let node =
            CameraNode::start(Box::new(FakeDevice::default()), &transport, &store, &settings)
                .unwrap();
        assert_eq!(transport.topics(), topics);
        // Dropping without an explicit stop withdraws the topics too.
        drop(node);
        assert!(transport.topics().is_empty());
        CameraNode::start(Box::new(FakeDevice::default()), &transport, &store, &settings)
            .unwrap();
    }

    #[test]
    fn test_partial_setup_failure_withdraws_advertised_topic() {
        let transport = BroadcastTransport::new();
        let _taken = transport.advertise("kinect2/depth/image_raw", 1).unwrap();
        let result = CameraNode::start(
            Box::new(FakeDevice::default()),
            &transport,
            &CalibrationStore::default(),
            &NodeSettings::new("kinect2"),
        );
        assert!(matches!(
            result,
            Err(NodeError::Transport(TransportError::DuplicateTopic(_)))
        ));
        assert_eq!(transport.topics(), vec!["kinect2/depth/image_raw".to_string()]);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let device = FakeDevice::default();
        let (_, stopped) = device.handles();
        let mut node = CameraNode::start(
            Box::new(device),
            &RecordingTransport::default(),
            &CalibrationStore::default(),
            &NodeSettings::new("kinect2"),
        )
        .unwrap();
        node.stop().unwrap();
        node.stop().unwrap();
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!node.status().ready);
    }
}
