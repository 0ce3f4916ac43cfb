use depthcam_core::{CameraNode, Stream};
use std::sync::{Arc, Mutex};
use zbus::interface;

pub const BUS_NAME: &str = "org.depthcam.Camera1";
pub const OBJECT_PATH: &str = "/org/depthcam/Camera1";

/// D-Bus interface for the depthcam daemon.
///
/// Bus name: org.depthcam.Camera1
/// Object path: /org/depthcam/Camera1
pub struct DepthcamService {
    node: Arc<Mutex<CameraNode>>,
}

impl DepthcamService {
    pub fn new(node: Arc<Mutex<CameraNode>>) -> Self {
        Self { node }
    }

    fn with_node<T>(&self, f: impl FnOnce(&CameraNode) -> T) -> zbus::fdo::Result<T> {
        let node = self
            .node
            .lock()
            .map_err(|_| zbus::fdo::Error::Failed("camera state poisoned".into()))?;
        Ok(f(&node))
    }
}

#[interface(name = "org.depthcam.Camera1")]
impl DepthcamService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.with_node(CameraNode::status)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": status,
        })
        .to_string())
    }

    /// Return the calibration record of a stream ("rgb" or "depth").
    async fn camera_info(&self, stream: &str) -> zbus::fdo::Result<String> {
        tracing::info!(stream, "camera_info requested");
        let stream: Stream = stream.parse().map_err(zbus::fdo::Error::InvalidArgs)?;
        let record = self
            .with_node(|node| node.calibration(stream))?
            .ok_or_else(|| zbus::fdo::Error::Failed("pipeline not ready".into()))?;
        serde_json::to_string(record.as_ref()).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}
