//! Transport seam and the in-process broadcast transport.

use crate::types::{ImageSample, StampedCalibration};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("topic already advertised: {0}")]
    DuplicateTopic(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// An image together with its stamped calibration, delivered as one unit.
#[derive(Debug, Clone)]
pub struct CameraMessage {
    pub image: ImageSample,
    pub info: StampedCalibration,
}

/// One outgoing stream.
///
/// `publish` must not block and never reports delivery failures.
pub trait PublishChannel: Send + Sync {
    fn topic(&self) -> &str;
    fn publish(&self, image: ImageSample, info: StampedCalibration);

    /// Withdraw the topic so it can be advertised again. Idempotent.
    fn close(&self) {}
}

/// Creates publish channels.
pub trait Transport: Send + Sync {
    fn advertise(
        &self,
        topic: &str,
        queue_depth: usize,
    ) -> Result<Box<dyn PublishChannel>, TransportError>;
}

/// In-process transport backed by `tokio::sync::broadcast`.
///
/// Each topic is a bounded broadcast channel sized by the queue depth;
/// slow subscribers lose the oldest messages instead of stalling the
/// publisher. A topic stays advertised until its channel is closed or dropped.
#[derive(Default)]
pub struct BroadcastTransport {
    topics: Arc<Mutex<TopicTable>>,
}

type TopicTable = HashMap<String, broadcast::Sender<Arc<CameraMessage>>>;

impl BroadcastTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an advertised topic.
    pub fn subscribe(&self, topic: &str) -> Option<broadcast::Receiver<Arc<CameraMessage>>> {
        let topics = self.topics.lock().ok()?;
        topics.get(topic).map(broadcast::Sender::subscribe)
    }

    /// Currently advertised topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }
}

impl Transport for BroadcastTransport {
    fn advertise(
        &self,
        topic: &str,
        queue_depth: usize,
    ) -> Result<Box<dyn PublishChannel>, TransportError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| TransportError::Unavailable("topic table poisoned".into()))?;
        if topics.contains_key(topic) {
            return Err(TransportError::DuplicateTopic(topic.to_string()));
        }
        let (tx, _) = broadcast::channel(queue_depth.max(1));
        topics.insert(topic.to_string(), tx.clone());
        tracing::debug!(topic, queue_depth, "advertised topic");
        Ok(Box::new(BroadcastChannel {
            topic: topic.to_string(),
            tx,
            table: Arc::clone(&self.topics),
        }))
    }
}

struct BroadcastChannel {
    topic: String,
    tx: broadcast::Sender<Arc<CameraMessage>>,
    table: Arc<Mutex<TopicTable>>,
}

impl PublishChannel for BroadcastChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, image: ImageSample, info: StampedCalibration) {
        // Err only means nobody is subscribed.
        let _ = self.tx.send(Arc::new(CameraMessage { image, info }));
    }

    fn close(&self) {
        let Ok(mut topics) = self.table.lock() else {
            return;
        };
        // The topic may since have been re-advertised by another channel.
        if topics
            .get(&self.topic)
            .is_some_and(|tx| tx.same_channel(&self.tx))
        {
            topics.remove(&self.topic);
            tracing::debug!(topic = %self.topic, "withdrew topic");
        }
    }
}

impl Drop for BroadcastChannel {
    fn drop(&mut self) {
        self.close();
    }
}
