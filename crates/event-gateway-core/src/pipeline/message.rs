//! Decoded application messages.

use bytes::Bytes;

use crate::protocol::records::{Record, RecordHeader};

/// One application payload extracted from a produce request.
///
/// Key, value and header bytes share the request buffer; handlers only ever
/// see them through shared references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    /// Offset assigned by the producer, usually relative to the batch.
    pub offset: i64,
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

impl Message {
    /// A message with only a topic and a value.
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            timestamp: -1,
            key: None,
            value: Some(value.into()),
            headers: Vec::new(),
        }
    }

    /// Attach a record decoded from `topic`/`partition`.
    #[must_use]
    pub fn from_record(topic: &str, partition: i32, record: Record) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            offset: record.offset,
            timestamp: record.timestamp,
            key: record.key,
            value: record.value,
            headers: record.headers,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(RecordHeader::new(key, Some(value.into())));
        self
    }

    /// The value bytes, or an empty slice for a tombstone.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }

    /// First header named `key`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&RecordHeader> {
        self.headers.iter().find(|h| h.key == key)
    }
}
