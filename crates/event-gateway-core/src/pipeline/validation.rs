//! Payload validation as a message handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HandlerError, ValidatorError};

use super::handler::{HandlerOutcome, MessageHandler};
use super::message::Message;

/// Decides whether a message payload is acceptable.
///
/// `Ok(false)` is a verdict; `Err` means no verdict could be reached.
pub trait MessageValidator: Send + Sync {
    fn validate(&self, message: &Message) -> Result<bool, ValidatorError>;
}

impl<F> MessageValidator for F
where
    F: Fn(&Message) -> Result<bool, ValidatorError> + Send + Sync,
{
    fn validate(&self, message: &Message) -> Result<bool, ValidatorError> {
        self(message)
    }
}

/// Accepts JSON object payloads carrying every required top-level field.
///
/// Tombstones (no value) are accepted.
#[derive(Debug, Clone, Default)]
pub struct JsonPayloadValidator {
    required_fields: Vec<String>,
}

impl JsonPayloadValidator {
    #[must_use]
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }
}

impl MessageValidator for JsonPayloadValidator {
    fn validate(&self, message: &Message) -> Result<bool, ValidatorError> {
        let Some(value) = &message.value else {
            return Ok(true);
        };

        let Ok(document) = serde_json::from_slice::<Value>(value) else {
            return Ok(false);
        };

        if self.required_fields.is_empty() {
            return Ok(true);
        }

        Ok(match document.as_object() {
            Some(object) => self.required_fields.iter().all(|f| object.contains_key(f)),
            None => false,
        })
    }
}

/// Runs a [`MessageValidator`] on every message.
///
/// Invalid messages are rejected (acknowledged and dead-lettered), unless
/// `fail_when_invalid` is set, in which case they are negatively
/// acknowledged. A validator error always negatively acknowledges.
pub struct ValidationHandler {
    validator: Arc<dyn MessageValidator>,
    fail_when_invalid: bool,
}

impl ValidationHandler {
    pub fn new(validator: Arc<dyn MessageValidator>, fail_when_invalid: bool) -> Self {
        Self {
            validator,
            fail_when_invalid,
        }
    }
}

#[async_trait]
impl MessageHandler for ValidationHandler {
    fn name(&self) -> &str {
        "validation"
    }

    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        match self.validator.validate(message) {
            Ok(true) => Ok(HandlerOutcome::Accepted),
            Ok(false) if self.fail_when_invalid => Err(HandlerError::new(format!(
                "message on topic {} is not valid",
                message.topic
            ))),
            Ok(false) => Ok(HandlerOutcome::Rejected {
                reason: "message is not valid".to_string(),
            }),
            Err(e) => Err(HandlerError::new(e.to_string())),
        }
    }
}
