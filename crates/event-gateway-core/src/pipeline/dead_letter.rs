//! Dead-letter side channel.
//!
//! Rejected payloads are republished to a configured topic. A single
//! publisher task drains a bounded queue; when the queue is full the payload
//! is dropped with a warning. Publish failures are logged and counted,
//! nothing else.

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::error::PublishError;
use crate::metrics::GatewayMetrics;

/// Default capacity of the dead-letter queue.
pub const DEFAULT_DEAD_LETTER_QUEUE: usize = 1024;

/// Destination for rejected payloads.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publish `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;
}

struct Pending {
    payload: Bytes,
    metrics: Option<Arc<GatewayMetrics>>,
}

/// A publisher bound to its topic.
///
/// Clones share one queue and one publisher task.
#[derive(Clone)]
pub struct DeadLetterSink {
    publisher: Arc<dyn DeadLetterPublisher>,
    topic: String,
    capacity: usize,
    queue: Arc<OnceLock<mpsc::Sender<Pending>>>,
}

impl DeadLetterSink {
    pub fn new(publisher: Arc<dyn DeadLetterPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            capacity: DEFAULT_DEAD_LETTER_QUEUE,
            queue: Arc::default(),
        }
    }

    /// Payloads waiting beyond this are dropped.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue `payload` for publishing without waiting.
    ///
    /// Returns false if the payload was dropped because the queue is full or
    /// the publisher task is gone.
    ///
    /// # Panics
    ///
    /// The first call spawns the publisher task and must run inside a Tokio
    /// runtime.
    pub fn enqueue(&self, payload: Bytes, metrics: Option<Arc<GatewayMetrics>>) -> bool {
        let queue = self.queue.get_or_init(|| self.spawn_publisher());

        match queue.try_send(Pending { payload, metrics }) {
            Ok(()) => true,
            Err(TrySendError::Full(pending)) => {
                warn!(
                    topic = %self.topic,
                    capacity = self.capacity,
                    "dead-letter queue full, dropping invalid message"
                );
                if let Some(metrics) = &pending.metrics {
                    metrics.record_dead_letter(false);
                }
                false
            }
            Err(TrySendError::Closed(pending)) => {
                error!(topic = %self.topic, "dead-letter publisher stopped, dropping invalid message");
                if let Some(metrics) = &pending.metrics {
                    metrics.record_dead_letter(false);
                }
                false
            }
        }
    }

    fn spawn_publisher(&self) -> mpsc::Sender<Pending> {
        let (sender, mut receiver) = mpsc::channel::<Pending>(self.capacity);
        let publisher = Arc::clone(&self.publisher);
        let topic = self.topic.clone();

        tokio::spawn(async move {
            while let Some(Pending { payload, metrics }) = receiver.recv().await {
                let result = publisher.publish(&topic, payload).await;
                if let Some(metrics) = &metrics {
                    metrics.record_dead_letter(result.is_ok());
                }
                match result {
                    Ok(()) => debug!(topic = %topic, "published invalid message"),
                    Err(e) => error!(topic = %topic, error = %e, "failed to publish invalid message"),
                }
            }
            debug!(topic = %topic, "dead-letter publisher stopped");
        });

        sender
    }
}

impl fmt::Debug for DeadLetterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterSink")
            .field("topic", &self.topic)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
