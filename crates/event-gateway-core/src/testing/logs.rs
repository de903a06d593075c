//! Log capture for asserting on emitted events.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// One captured event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

/// A `tracing` layer keeping every event in memory.
///
/// Install it for the current thread with [`LogCapture::install`]; tasks
/// spawned on a current-thread runtime log into it too.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make this the default subscriber until the guard is dropped.
    #[must_use]
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    #[must_use]
    pub fn events(&self) -> Vec<CapturedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events at `level` whose message is `message`.
    #[must_use]
    pub fn matching(&self, level: Level, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level && event.message == message)
            .collect()
    }

    /// Events at `level` whose message contains `text`.
    #[must_use]
    pub fn containing(&self, level: Level, text: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level && event.message.contains(text))
            .collect()
    }

    #[must_use]
    pub fn count(&self, level: Level) -> usize {
        self.events().iter().filter(|event| event.level == level).count()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let captured = CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        };
        match self.events.lock() {
            Ok(mut events) => events.push(captured),
            Err(poisoned) => poisoned.into_inner().push(captured),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info};

    #[test]
    fn test_captures_message_and_fields() {
        let logs = LogCapture::new();
        {
            let _guard = logs.install();
            let err = "boom";
            error!(error = %err, attempt = 2, "handler failed");
            info!("unrelated");
        }
        info!("not captured");

        let errors = logs.matching(Level::ERROR, "handler failed");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field("error"), Some("boom"));
        assert_eq!(errors[0].field("attempt"), Some("2"));
        assert_eq!(logs.count(Level::INFO), 1);
        assert_eq!(logs.containing(Level::INFO, "unrel").len(), 1);
    }
}
