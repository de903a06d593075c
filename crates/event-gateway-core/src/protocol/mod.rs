//! Kafka wire protocol pieces the gateway inspects.
//!
//! Only produce requests are decoded in full. Everything else is identified
//! by its [`RequestKeyVersion`] and forwarded as raw bytes.

pub mod control;
pub mod header;
pub mod produce;
pub mod records;

pub use control::{ControlRecord, ControlRecordKind, TransactionMarker};
pub use header::{RequestKeyVersion, FIND_COORDINATOR, METADATA, PRODUCE, REQUEST_KEY_VERSION_SIZE};
pub use produce::{decode_produce_messages, ProduceEnvelope, ProduceRequestBuilder, MAX_PRODUCE_VERSION};
pub use records::{
    decode_records, Compression, DecodedRecords, MessageSetBuilder, Record, RecordBatchBuilder, RecordHeader,
};
