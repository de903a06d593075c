//! Message dispatch pipeline.
//!
//! Decoded messages flow through an ordered [`HandlerChain`] on the workers
//! of each connection's [`MessageRouter`], started from a shared
//! [`Dispatcher`]. A handler error is a negative acknowledgment and the
//! message is delivered again; a rejection is acknowledged and the payload
//! goes to the [`DeadLetterSink`], if any.

pub mod dead_letter;
pub mod handler;
pub mod message;
pub mod router;
pub mod validation;

pub use dead_letter::{DeadLetterPublisher, DeadLetterSink};
pub use handler::{handler_fn, Delivery, FnHandler, HandlerChain, HandlerOutcome, MessageHandler};
pub use message::Message;
pub use router::{Dispatcher, MessageRouter, RouterSettings};
pub use validation::{JsonPayloadValidator, MessageValidator, ValidationHandler};
