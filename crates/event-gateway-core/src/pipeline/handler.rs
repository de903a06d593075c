//! Message handlers and the ordered handler chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;

use super::message::Message;

/// What a handler decided about a message it did not fail on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Pass the message on to the next handler.
    Accepted,
    /// Stop the chain and acknowledge; the payload goes to the dead-letter topic.
    Rejected { reason: String },
}

/// A step of the dispatch pipeline.
///
/// Returning an error negatively acknowledges the message, which is then
/// delivered to the whole chain again.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Inspect one message.
    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError>;
}

/// Adapter turning a closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Message) -> Result<HandlerOutcome, HandlerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Message) -> Result<HandlerOutcome, HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        (self.f)(message)
    }
}

/// Shorthand for [`FnHandler::new`] wrapped in an `Arc`.
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&Message) -> Result<HandlerOutcome, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(name, f))
}

/// Result of running a message through the chain once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Every handler accepted the message.
    Ack,
    /// A handler rejected the message; it is acknowledged all the same.
    Rejected { handler: String, reason: String },
    /// A handler failed; the message must be delivered again.
    Nack { handler: String, error: HandlerError },
}

/// Ordered, immutable list of handlers.
#[derive(Clone)]
pub struct HandlerChain {
    handlers: Arc<[Arc<dyn MessageHandler>]>,
}

impl HandlerChain {
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn MessageHandler>>) -> Self {
        Self {
            handlers: handlers.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Run `message` through every handler in order.
    ///
    /// The chain stops at the first rejection or failure.
    pub async fn process(&self, message: &Message) -> Delivery {
        for handler in self.handlers.iter() {
            match handler.handle(message).await {
                Ok(HandlerOutcome::Accepted) => {}
                Ok(HandlerOutcome::Rejected { reason }) => {
                    return Delivery::Rejected {
                        handler: handler.name().to_string(),
                        reason,
                    };
                }
                Err(error) => {
                    return Delivery::Nack {
                        handler: handler.name().to_string(),
                        error,
                    };
                }
            }
        }
        Delivery::Ack
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}
