//! Integration tests for message dispatch through the router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use event_gateway_core::error::HandlerError;
use event_gateway_core::pipeline::{
    handler_fn, DeadLetterSink, HandlerChain, HandlerOutcome, JsonPayloadValidator, Message,
    MessageHandler, MessageRouter, RouterSettings, ValidationHandler,
};
use event_gateway_core::testing::{LogCapture, RecordingPublisher};
use tokio::sync::broadcast;
use tracing::Level;

const NACK_MESSAGE: &str = "message handler failed, redelivering";

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn single_worker() -> RouterSettings {
    RouterSettings {
        workers: 1,
        queue_capacity: 16,
    }
}

#[tokio::test]
async fn test_accepting_handlers_run_once_and_log_no_error() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let chain = HandlerChain::new(vec![
        {
            let calls = Arc::clone(&first);
            handler_fn("first", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerOutcome::Accepted)
            })
        },
        {
            let calls = Arc::clone(&second);
            handler_fn("second", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerOutcome::Accepted)
            })
        },
    ]);

    let (shutdown, _) = broadcast::channel(1);
    let router = MessageRouter::start(chain, None, None, single_worker(), &shutdown);
    let queued = router
        .submit(vec![Message::new("orders", "a"), Message::new("orders", "b")])
        .await;
    assert_eq!(queued, 2);

    wait_until(|| second.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(Ordering::SeqCst), 2);
    assert_eq!(logs.count(Level::ERROR), 0);

    shutdown.send(()).unwrap();
    router.join().await;
}

#[tokio::test]
async fn test_failing_handler_is_redelivered_and_logged_each_time() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let calls = Arc::new(AtomicUsize::new(0));
    let chain = HandlerChain::new(vec![{
        let calls = Arc::clone(&calls);
        handler_fn("always-fails", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::new("schema registry unreachable"))
        })
    }]);

    let (shutdown, _) = broadcast::channel(1);
    let router = MessageRouter::start(chain, None, None, single_worker(), &shutdown);
    router.submit(vec![Message::new("orders", "payload")]).await;

    wait_until(|| calls.load(Ordering::SeqCst) >= 3).await;
    shutdown.send(()).unwrap();
    router.join().await;

    let delivered = calls.load(Ordering::SeqCst);
    let errors = logs.matching(Level::ERROR, NACK_MESSAGE);
    assert!(delivered > 1);
    assert_eq!(errors.len(), delivered);
    for event in &errors {
        assert_eq!(event.field("error"), Some("schema registry unreachable"));
        assert_eq!(event.field("handler"), Some("always-fails"));
    }
}

#[tokio::test]
async fn test_later_handlers_skipped_after_failure() {
    let later = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    let chain = HandlerChain::new(vec![
        {
            let attempts = Arc::clone(&attempts);
            handler_fn("flaky", move |_| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HandlerError::new("first attempt fails"))
                } else {
                    Ok(HandlerOutcome::Accepted)
                }
            })
        },
        {
            let later = Arc::clone(&later);
            handler_fn("after", move |_| {
                later.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerOutcome::Accepted)
            })
        },
    ]);

    let (shutdown, _) = broadcast::channel(1);
    let router = MessageRouter::start(chain, None, None, single_worker(), &shutdown);
    router.submit(vec![Message::new("orders", "x")]).await;

    wait_until(|| later.load(Ordering::SeqCst) == 1).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    shutdown.send(()).unwrap();
    router.join().await;
}

#[tokio::test]
async fn test_invalid_payload_goes_to_dead_letter_topic() {
    let publisher = RecordingPublisher::new();
    let validation: Arc<dyn MessageHandler> = Arc::new(ValidationHandler::new(
        Arc::new(JsonPayloadValidator::new(vec!["id".to_string()])),
        false,
    ));
    let chain = HandlerChain::new(vec![validation]);
    let sink = DeadLetterSink::new(publisher.clone(), "invalid-messages");

    let (shutdown, _) = broadcast::channel(1);
    let router = MessageRouter::start(chain, Some(sink), None, single_worker(), &shutdown);
    router
        .submit(vec![
            Message::new("orders", r#"{"id": 1}"#),
            Message::new("orders", "not json"),
        ])
        .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while publisher.published().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let published = publisher.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "invalid-messages");
    assert_eq!(&published[0].1[..], b"not json");

    shutdown.send(()).unwrap();
    router.join().await;
}
