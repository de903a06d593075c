//! Message router: worker tasks delivering messages to the handler chain.
//!
//! Every client connection starts its own [`MessageRouter`] from the shared
//! [`Dispatcher`]. The interceptor submits decoded messages through the
//! router's bounded channel and goes back to forwarding bytes. Each worker
//! takes one message at a time and runs it through the chain until it is
//! acknowledged:
//!
//! - ack: done
//! - rejected: acknowledged, payload handed to the dead-letter sink
//! - nack: logged with the handler's error text and delivered again
//!
//! Redelivery has no limit and no backoff. A permanently failing message
//! keeps its worker busy, which stalls only the connection that sent it.
//! Once that connection closes the router is dropped, the message gets a
//! final attempt and is then discarded with a warning.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::prometheus::{RESULT_ACK, RESULT_NACK, RESULT_REJECTED};
use crate::metrics::GatewayMetrics;

use super::dead_letter::DeadLetterSink;
use super::handler::{Delivery, HandlerChain};
use super::message::Message;

/// Default number of worker tasks per connection.
pub const DEFAULT_WORKERS: usize = 1;

/// Default capacity of a connection's submission queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Router sizing, per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// State shared by the workers of every router.
struct Worker {
    chain: HandlerChain,
    dead_letter: Option<DeadLetterSink>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl Worker {
    /// Deliver until acknowledged. Returns false if shutdown interrupted it.
    async fn deliver(
        &self,
        message: Message,
        shutdown: &mut broadcast::Receiver<()>,
        closed: &watch::Receiver<bool>,
    ) -> bool {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            match self.chain.process(&message).await {
                Delivery::Ack => {
                    self.record(RESULT_ACK);
                    debug!(topic = %message.topic, partition = message.partition, attempt, "message acknowledged");
                    return true;
                }
                Delivery::Rejected { handler, reason } => {
                    self.record(RESULT_REJECTED);
                    self.dead_letter(&message, &handler, &reason);
                    return true;
                }
                Delivery::Nack { handler, error } => {
                    self.record(RESULT_NACK);
                    error!(
                        error = %error,
                        handler = %handler,
                        topic = %message.topic,
                        partition = message.partition,
                        attempt,
                        "message handler failed, redelivering"
                    );
                }
            }

            if *closed.borrow() {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    attempt,
                    "connection closed, dropping unacknowledged message"
                );
                return true;
            }

            tokio::select! {
                biased;
                _ = shutdown.recv() => return false,
                () = tokio::task::yield_now() => {}
            }
        }
    }

    fn dead_letter(&self, message: &Message, handler: &str, reason: &str) {
        match &self.dead_letter {
            Some(sink) => {
                warn!(
                    topic = %message.topic,
                    handler = %handler,
                    reason = %reason,
                    dead_letter_topic = %sink.topic(),
                    "message rejected, publishing to dead-letter topic"
                );
                let payload = message.value.clone().unwrap_or_default();
                sink.enqueue(payload, self.metrics.clone());
            }
            None => warn!(
                topic = %message.topic,
                handler = %handler,
                reason = %reason,
                "message rejected and discarded"
            ),
        }
    }

    fn record(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_handler_result(result);
        }
    }
}

/// Handler chain, dead-letter sink and sizing shared by all connections.
///
/// Cheap to clone; [`Dispatcher::start`] gives each connection its own
/// queue and workers.
#[derive(Clone)]
pub struct Dispatcher {
    worker: Arc<Worker>,
    settings: RouterSettings,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        chain: HandlerChain,
        dead_letter: Option<DeadLetterSink>,
        metrics: Option<Arc<GatewayMetrics>>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                chain,
                dead_letter,
                metrics,
            }),
            settings,
        }
    }

    /// Whether any handler is configured. Without handlers nothing needs
    /// decoding at all.
    #[must_use]
    pub fn has_handlers(&self) -> bool {
        !self.worker.chain.is_empty()
    }

    #[must_use]
    pub fn settings(&self) -> RouterSettings {
        self.settings
    }

    /// Start a router with its own queue and workers. The workers stop when
    /// `shutdown` fires, or once the router is dropped and its queue drained.
    /// No workers are spawned when there are no handlers.
    #[must_use]
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> MessageRouter {
        let (sender, receiver) = mpsc::channel(self.settings.queue_capacity.max(1));
        let (closed, closed_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));
        let has_handlers = self.has_handlers();
        let count = if has_handlers { self.settings.workers.max(1) } else { 0 };

        let workers = (0..count)
            .map(|id| {
                let worker = Arc::clone(&self.worker);
                let receiver = Arc::clone(&receiver);
                let closed = closed_rx.clone();
                let mut shutdown = shutdown.subscribe();

                tokio::spawn(async move {
                    loop {
                        let message = tokio::select! {
                            _ = shutdown.recv() => break,
                            message = async { receiver.lock().await.recv().await } => match message {
                                Some(message) => message,
                                None => break,
                            },
                        };

                        if !worker.deliver(message, &mut shutdown, &closed).await {
                            break;
                        }
                    }
                    debug!(worker = id, "message router worker stopped");
                })
            })
            .collect();

        debug!(workers = count, "message router started");

        MessageRouter {
            sender,
            closed,
            workers: std::sync::Mutex::new(workers),
            has_handlers,
        }
    }
}

/// One connection's queue and worker tasks.
///
/// Dropping the router ends redelivery: queued messages get one more
/// attempt and unacknowledged ones are discarded.
pub struct MessageRouter {
    sender: mpsc::Sender<Message>,
    closed: watch::Sender<bool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    has_handlers: bool,
}

impl MessageRouter {
    /// Start a standalone router; see [`Dispatcher::start`].
    #[must_use]
    pub fn start(
        chain: HandlerChain,
        dead_letter: Option<DeadLetterSink>,
        metrics: Option<Arc<GatewayMetrics>>,
        settings: RouterSettings,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        Dispatcher::new(chain, dead_letter, metrics, settings).start(shutdown)
    }

    #[must_use]
    pub fn has_handlers(&self) -> bool {
        self.has_handlers
    }

    /// Queue messages for delivery, waiting while the queue is full.
    ///
    /// Returns how many messages were queued; fewer than given only if the
    /// workers are gone or there are no handlers.
    pub async fn submit(&self, messages: Vec<Message>) -> usize {
        if !self.has_handlers {
            return 0;
        }
        let mut queued = 0;
        for message in messages {
            if self.sender.send(message).await.is_err() {
                warn!("message router stopped, dropping messages");
                break;
            }
            queued += 1;
        }
        queued
    }

    /// Wait for every worker to stop.
    pub async fn join(&self) {
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for worker in workers {
            let _ = worker.await;
        }
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::pipeline::handler::{handler_fn, HandlerOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn wait_for(counter: &AtomicUsize, at_least: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < at_least {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("counter did not reach target");
    }

    #[tokio::test]
    async fn test_acked_messages_are_handled_once() {
        let (shutdown, _) = broadcast::channel(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let chain = HandlerChain::new(vec![handler_fn("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerOutcome::Accepted)
        })]);
        let metrics = Arc::new(GatewayMetrics::new());

        let router = MessageRouter::start(chain, None, Some(metrics.clone()), RouterSettings::default(), &shutdown);
        let queued = router
            .submit(vec![Message::new("t", "a"), Message::new("t", "b")])
            .await;
        assert_eq!(queued, 2);

        wait_for(&calls, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.handler_results.with_label_values(&[RESULT_ACK]).get(), 2.0);

        shutdown.send(()).unwrap();
        router.join().await;
    }

    #[tokio::test]
    async fn test_failing_message_is_redelivered() {
        let (shutdown, _) = broadcast::channel(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let chain = HandlerChain::new(vec![handler_fn("always-fails", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::new("nope"))
        })]);

        let router = MessageRouter::start(
            chain,
            None,
            None,
            RouterSettings {
                workers: 1,
                queue_capacity: 4,
            },
            &shutdown,
        );
        router.submit(vec![Message::new("t", "x")]).await;

        wait_for(&calls, 3).await;

        shutdown.send(()).unwrap();
        router.join().await;
    }

    #[tokio::test]
    async fn test_message_succeeding_on_retry_stops_redelivery() {
        let (shutdown, _) = broadcast::channel(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let chain = HandlerChain::new(vec![handler_fn("flaky", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(HandlerError::new("transient"))
            } else {
                Ok(HandlerOutcome::Accepted)
            }
        })]);

        let router = MessageRouter::start(chain, None, None, RouterSettings::default(), &shutdown);
        router.submit(vec![Message::new("t", "x")]).await;

        wait_for(&calls, 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        shutdown.send(()).unwrap();
        router.join().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_drops() {
        let (shutdown, _) = broadcast::channel(1);
        let chain = HandlerChain::new(vec![handler_fn("ok", |_| Ok(HandlerOutcome::Accepted))]);
        let router = MessageRouter::start(
            chain,
            None,
            None,
            RouterSettings {
                workers: 1,
                queue_capacity: 1,
            },
            &shutdown,
        );
        assert!(router.has_handlers());

        shutdown.send(()).unwrap();
        router.join().await;

        assert_eq!(router.submit(vec![Message::new("t", "x")]).await, 0);
    }

    #[tokio::test]
    async fn test_without_handlers_nothing_is_queued() {
        let (shutdown, _) = broadcast::channel(1);
        let dispatcher = Dispatcher::new(HandlerChain::default(), None, None, RouterSettings::default());
        assert!(!dispatcher.has_handlers());

        let router = dispatcher.start(&shutdown);
        assert!(!router.has_handlers());
        assert_eq!(router.submit(vec![Message::new("t", "x")]).await, 0);
        router.join().await;
    }

    #[tokio::test]
    async fn test_dropping_router_ends_redelivery() {
        let (shutdown, _) = broadcast::channel(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let chain = HandlerChain::new(vec![handler_fn("always-fails", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::new("nope"))
        })]);
        let dispatcher = Dispatcher::new(
            chain,
            None,
            None,
            RouterSettings {
                workers: 1,
                queue_capacity: 4,
            },
        );

        let router = dispatcher.start(&shutdown);
        router.submit(vec![Message::new("t", "x"), Message::new("t", "y")]).await;
        wait_for(&calls, 3).await;
        drop(router);

        // each message gets at most one more attempt
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_routers_from_one_dispatcher_are_independent() {
        let (shutdown, _) = broadcast::channel(1);
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        let chain = HandlerChain::new(vec![handler_fn("poison", move |message| {
            if message.payload() == b"poison" {
                return Err(HandlerError::new("poison"));
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerOutcome::Accepted)
        })]);
        let dispatcher = Dispatcher::new(
            chain,
            None,
            None,
            RouterSettings {
                workers: 1,
                queue_capacity: 1,
            },
        );

        let stuck = dispatcher.start(&shutdown);
        // the worker holds one poison message and the queue holds the other
        stuck
            .submit(vec![Message::new("t", "poison"), Message::new("t", "poison")])
            .await;

        let healthy = dispatcher.start(&shutdown);
        let queued = tokio::time::timeout(Duration::from_secs(2), healthy.submit(vec![Message::new("t", "ok")]))
            .await
            .expect("submit blocked by another router");
        assert_eq!(queued, 1);
        wait_for(&handled, 1).await;

        shutdown.send(()).unwrap();
        stuck.join().await;
        healthy.join().await;
    }
}
