//! Record batch and legacy message set decoding.
//!
//! The `records` field of a produce partition is a run of entries that all
//! start with `offset: i64, size: i32` and carry their magic byte at byte 16.
//! Magic 2 is a record batch, magic 0 and 1 are legacy messages. Entries are
//! decoded by [`RecordBatchDecoder`], which verifies checksums and inflates
//! compressed batches; control batches come back as [`ControlRecord`]s.
//!
//! Batch headers are range checked before decoding: record offsets and
//! timestamps are computed as `base + delta` with 32-bit deltas, so a base
//! within `i32` reach of the `i64` limits is refused. Record and header
//! counts are checked against the bytes that could hold them, since the
//! decoder preallocates for whatever count it is given.

use bytes::{Buf, Bytes, BytesMut};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{
    Record as WireRecord, RecordBatchDecoder, RecordBatchEncoder, RecordEncodeOptions,
    TimestampType, NO_PARTITION_LEADER_EPOCH, NO_PRODUCER_EPOCH, NO_PRODUCER_ID,
};

pub use kafka_protocol::records::Compression;

use crate::error::{DecodeError, DecodeResult, ProxyError, Result};

use super::control::ControlRecord;

/// Magic byte of the record batch encoding.
pub const MAGIC_RECORD_BATCH: i8 = 2;

/// Most records a single batch may declare.
pub const MAX_BATCH_RECORDS: usize = 1 << 17;

/// `offset: i64, size: i32` ahead of every entry.
const ENTRY_PREFIX: usize = 12;

/// Offset of the magic byte from the start of any entry.
const MAGIC_OFFSET: usize = 16;

/// Offset of the attributes in a record batch.
const ATTRIBUTES_OFFSET: usize = 21;

/// Size of a record batch up to and including the record count.
const BATCH_HEADER_SIZE: usize = 61;

/// Compression codec bits of the batch attributes.
const COMPRESSION_MASK: i16 = 0x07;

/// A record header. Keys are strings, values are nullable bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Bytes>,
}

impl RecordHeader {
    pub fn new(key: impl Into<String>, value: Option<Bytes>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// One application record, from either encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Absolute offset as written by the producer.
    pub offset: i64,
    /// Timestamp in milliseconds, `-1` when the encoding has none.
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    /// Always empty for legacy messages.
    pub headers: Vec<RecordHeader>,
}

impl From<WireRecord> for Record {
    fn from(record: WireRecord) -> Self {
        Self {
            offset: record.offset,
            timestamp: record.timestamp,
            key: record.key,
            value: record.value,
            headers: record
                .headers
                .into_iter()
                .map(|(key, value)| RecordHeader {
                    key: key.to_string(),
                    value,
                })
                .collect(),
        }
    }
}

/// Everything decoded from a `records` field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRecords {
    pub records: Vec<Record>,
    pub control_records: Vec<ControlRecord>,
}

/// Decode every entry of a `records` buffer.
///
/// # Errors
///
/// Returns a [`DecodeError`] for malformed or truncated input, a checksum
/// mismatch, an unknown magic byte or a batch header out of range.
pub fn decode_records(data: Bytes) -> DecodeResult<DecodedRecords> {
    check_entries(&data)?;

    let mut buf = data;
    let sets = RecordBatchDecoder::decode_all(&mut buf)
        .map_err(|e| DecodeError::Records(format!("{e:#}")))?;

    let mut decoded = DecodedRecords::default();
    for record in sets.into_iter().flat_map(|set| set.records) {
        if record.control {
            decoded
                .control_records
                .push(ControlRecord::decode(record.key.as_ref(), record.value.as_ref())?);
        } else {
            decoded.records.push(Record::from(record));
        }
    }

    Ok(decoded)
}

/// Walk the entry headers and refuse what the decoder cannot take safely.
///
/// Structural problems such as short buffers or negative sizes are left to
/// the decoder, which reports them.
fn check_entries(data: &[u8]) -> DecodeResult<()> {
    let mut rest = data;

    while rest.len() >= ENTRY_PREFIX {
        let mut prefix = &rest[..ENTRY_PREFIX];
        let base_offset = prefix.get_i64();
        let Ok(size) = usize::try_from(prefix.get_i32()) else {
            return Ok(());
        };
        let end = ENTRY_PREFIX.saturating_add(size).min(rest.len());
        let entry = &rest[..end];

        match entry.get(MAGIC_OFFSET).map(|&magic| magic as i8) {
            Some(MAGIC_RECORD_BATCH) => check_batch_header(base_offset, entry)?,
            Some(0 | 1) | None => {}
            Some(other) => return Err(DecodeError::UnsupportedMagic(other)),
        }

        rest = &rest[end..];
    }

    Ok(())
}

fn check_batch_header(base_offset: i64, batch: &[u8]) -> DecodeResult<()> {
    if batch.len() < BATCH_HEADER_SIZE {
        return Ok(());
    }

    let mut header = &batch[ATTRIBUTES_OFFSET..BATCH_HEADER_SIZE];
    let attributes = header.get_i16();
    let _last_offset_delta = header.get_i32();
    let first_timestamp = header.get_i64();
    // max timestamp, producer id, producer epoch, base sequence
    header.advance(8 + 8 + 2 + 4);
    let record_count = header.get_i32();

    check_delta_reach("base offset", base_offset)?;
    check_delta_reach("first timestamp", first_timestamp)?;

    let uncompressed = attributes & COMPRESSION_MASK == 0;
    let records = &batch[BATCH_HEADER_SIZE..];
    let limit = if uncompressed {
        records.len().min(MAX_BATCH_RECORDS)
    } else {
        MAX_BATCH_RECORDS
    };
    let count = match usize::try_from(record_count) {
        Ok(count) if count > limit => {
            return Err(DecodeError::InvalidLength {
                field: "record count",
                length: i64::from(record_count),
            })
        }
        Ok(count) => count,
        Err(_) => return Ok(()),
    };

    if uncompressed {
        check_header_counts(records, count)?;
    }
    Ok(())
}

/// Every header takes at least two bytes, so a record cannot declare more
/// headers than half its remaining length.
fn check_header_counts(mut records: &[u8], count: usize) -> DecodeResult<()> {
    for _ in 0..count {
        let Some(size) = read_varint(&mut records).and_then(|n| usize::try_from(n).ok()) else {
            return Ok(());
        };
        if size > records.len() {
            return Ok(());
        }
        let (mut record, rest) = records.split_at(size);
        records = rest;

        // attributes, then timestamp and offset deltas
        let Some((_, tail)) = record.split_first() else {
            return Ok(());
        };
        record = tail;
        if read_varint(&mut record).is_none() || read_varint(&mut record).is_none() {
            return Ok(());
        }
        // key and value
        for _ in 0..2 {
            let Some(len) = read_varint(&mut record) else {
                return Ok(());
            };
            if let Ok(len) = usize::try_from(len) {
                if len > record.len() {
                    return Ok(());
                }
                record.advance(len);
            }
        }

        let Some(headers) = read_varint(&mut record) else {
            return Ok(());
        };
        if usize::try_from(headers).is_ok_and(|headers| headers > record.len() / 2) {
            return Err(DecodeError::InvalidLength {
                field: "header count",
                length: i64::from(headers),
            });
        }
    }

    Ok(())
}

/// Zigzag varint of at most five bytes.
fn read_varint(buf: &mut &[u8]) -> Option<i32> {
    let mut zigzag: u32 = 0;
    for shift in (0..35).step_by(7) {
        let (&byte, rest) = buf.split_first()?;
        *buf = rest;
        zigzag |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(((zigzag >> 1) as i32) ^ -((zigzag & 1) as i32));
        }
    }
    None
}

/// `base + delta` must not overflow for any 32-bit delta.
fn check_delta_reach(field: &'static str, base: i64) -> DecodeResult<()> {
    let low = base.checked_add(i64::from(i32::MIN));
    let high = base.checked_add(i64::from(i32::MAX));
    match (low, high) {
        (Some(_), Some(_)) => Ok(()),
        _ => Err(DecodeError::DeltaOverflow { field, base }),
    }
}

fn encode(records: &[WireRecord], options: &RecordEncodeOptions) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    RecordBatchEncoder::encode(&mut buf, records.iter(), options).map_err(|e| {
        ProxyError::ProtocolEncode {
            message: format!("{e:#}"),
        }
    })?;
    Ok(buf.freeze())
}

/// Builder for a magic 2 record batch.
#[derive(Debug, Clone)]
pub struct RecordBatchBuilder {
    base_offset: i64,
    base_timestamp: i64,
    producer_id: i64,
    producer_epoch: i16,
    transactional: bool,
    control: bool,
    compression: Compression,
    records: Vec<(Option<Bytes>, Option<Bytes>, Vec<RecordHeader>)>,
}

impl Default for RecordBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBatchBuilder {
    /// An uncompressed, non-transactional batch at offset 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_offset: 0,
            base_timestamp: 0,
            producer_id: NO_PRODUCER_ID,
            producer_epoch: NO_PRODUCER_EPOCH,
            transactional: false,
            control: false,
            compression: Compression::None,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn base_offset(mut self, base_offset: i64) -> Self {
        self.base_offset = base_offset;
        self
    }

    #[must_use]
    pub fn base_timestamp(mut self, base_timestamp: i64) -> Self {
        self.base_timestamp = base_timestamp;
        self
    }

    /// Mark the batch as part of a transaction owned by `producer_id`.
    #[must_use]
    pub fn transactional(mut self, producer_id: i64, producer_epoch: i16) -> Self {
        self.producer_id = producer_id;
        self.producer_epoch = producer_epoch;
        self.transactional = true;
        self
    }

    /// Mark the batch as a control batch.
    #[must_use]
    pub fn control(mut self) -> Self {
        self.control = true;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn record(self, key: Option<Bytes>, value: Option<Bytes>) -> Self {
        self.record_with_headers(key, value, Vec::new())
    }

    #[must_use]
    pub fn record_with_headers(
        mut self,
        key: Option<Bytes>,
        value: Option<Bytes>,
        headers: Vec<RecordHeader>,
    ) -> Self {
        self.records.push((key, value, headers));
        self
    }

    /// Encode the batch, including its offset and size prefix.
    ///
    /// # Errors
    ///
    /// Fails if the records cannot be compressed or the batch grows past
    /// the `i32` size limit.
    pub fn build(&self) -> Result<Bytes> {
        let records: Vec<WireRecord> = self
            .records
            .iter()
            .enumerate()
            .map(|(delta, (key, value, headers))| {
                let offset = self.base_offset.wrapping_add(delta as i64);
                WireRecord {
                    transactional: self.transactional,
                    control: self.control,
                    partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
                    producer_id: self.producer_id,
                    producer_epoch: self.producer_epoch,
                    timestamp_type: TimestampType::Creation,
                    offset,
                    // keeps every record in one batch
                    sequence: offset as i32,
                    timestamp: self.base_timestamp,
                    key: key.clone(),
                    value: value.clone(),
                    headers: headers
                        .iter()
                        .map(|h| (StrBytes::from_string(h.key.clone()), h.value.clone()))
                        .collect(),
                }
            })
            .collect();

        encode(
            &records,
            &RecordEncodeOptions {
                version: MAGIC_RECORD_BATCH,
                compression: self.compression,
            },
        )
    }
}

/// Builder for a legacy message set.
#[derive(Debug, Clone)]
pub struct MessageSetBuilder {
    magic: i8,
    timestamp: i64,
    compression: Compression,
    messages: Vec<(Option<Bytes>, Option<Bytes>)>,
}

impl MessageSetBuilder {
    /// Messages of format version `magic`, 0 or 1.
    #[must_use]
    pub fn new(magic: i8) -> Self {
        Self {
            magic,
            timestamp: 0,
            compression: Compression::None,
            messages: Vec::new(),
        }
    }

    /// Timestamp written into magic 1 messages.
    #[must_use]
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Wrap the messages in one compressed wrapper message.
    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn message(mut self, key: Option<Bytes>, value: Option<Bytes>) -> Self {
        self.messages.push((key, value));
        self
    }

    /// Encode the message set.
    ///
    /// # Errors
    ///
    /// Fails if the messages cannot be compressed.
    pub fn build(&self) -> Result<Bytes> {
        let records: Vec<WireRecord> = self
            .messages
            .iter()
            .enumerate()
            .map(|(offset, (key, value))| WireRecord {
                transactional: false,
                control: false,
                partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
                producer_id: NO_PRODUCER_ID,
                producer_epoch: NO_PRODUCER_EPOCH,
                timestamp_type: TimestampType::Creation,
                offset: offset as i64,
                sequence: offset as i32,
                timestamp: self.timestamp,
                key: key.clone(),
                value: value.clone(),
                headers: Default::default(),
            })
            .collect();

        encode(
            &records,
            &RecordEncodeOptions {
                version: self.magic,
                compression: self.compression,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::control::{ControlRecordKind, TransactionMarker, CONTROL_TYPE_COMMIT};
    use bytes::BufMut;

    fn bytes(s: &'static str) -> Option<Bytes> {
        Some(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn test_decode_record_batch() {
        let batch = RecordBatchBuilder::new()
            .base_offset(100)
            .base_timestamp(1_700_000_000_000)
            .record(bytes("k1"), bytes("v1"))
            .record_with_headers(
                None,
                bytes("v2"),
                vec![RecordHeader::new("trace", bytes("abc")), RecordHeader::new("empty", None)],
            )
            .build()
            .unwrap();

        let decoded = decode_records(batch).unwrap();
        assert!(decoded.control_records.is_empty());
        assert_eq!(decoded.records.len(), 2);

        let first = &decoded.records[0];
        assert_eq!(first.offset, 100);
        assert_eq!(first.timestamp, 1_700_000_000_000);
        assert_eq!(first.key, bytes("k1"));
        assert_eq!(first.value, bytes("v1"));

        let second = &decoded.records[1];
        assert_eq!(second.offset, 101);
        assert_eq!(second.key, None);
        assert_eq!(second.headers.len(), 2);
        assert_eq!(second.headers[0].key, "trace");
        assert_eq!(second.headers[1].value, None);
    }

    #[test]
    fn test_decode_concatenated_batches() {
        let mut buf = BytesMut::new();
        buf.put_slice(&RecordBatchBuilder::new().record(None, bytes("a")).build().unwrap());
        buf.put_slice(
            &RecordBatchBuilder::new()
                .base_offset(1)
                .record(None, bytes("b"))
                .build()
                .unwrap(),
        );

        let decoded = decode_records(buf.freeze()).unwrap();
        let values: Vec<_> = decoded.records.iter().map(|r| r.value.clone()).collect();
        assert_eq!(values, vec![bytes("a"), bytes("b")]);
    }

    #[test]
    fn test_compressed_batches_are_decoded() {
        for compression in [
            Compression::Gzip,
            Compression::Snappy,
            Compression::Lz4,
            Compression::Zstd,
        ] {
            let batch = RecordBatchBuilder::new()
                .compression(compression)
                .record(bytes("k"), bytes("{\"id\":1}"))
                .record(None, bytes("{\"id\":2}"))
                .build()
                .unwrap();

            let decoded = decode_records(batch).unwrap();
            assert_eq!(decoded.records.len(), 2, "{compression:?}");
            assert_eq!(decoded.records[0].key, bytes("k"));
            assert_eq!(decoded.records[1].value, bytes("{\"id\":2}"));
        }
    }

    #[test]
    fn test_crc32c_mismatch_is_reported() {
        let batch = RecordBatchBuilder::new().record(None, bytes("payload")).build().unwrap();
        let mut batch = BytesMut::from(&batch[..]);
        let last = batch.len() - 1;
        batch[last] ^= 0xff;

        assert!(matches!(
            decode_records(batch.freeze()),
            Err(DecodeError::Records(message)) if message.contains("Cyclic redundancy check")
        ));
    }

    #[test]
    fn test_truncated_batch() {
        let batch = RecordBatchBuilder::new().record(None, bytes("x")).build().unwrap();
        let truncated = batch.slice(..batch.len() - 3);
        assert!(matches!(decode_records(truncated), Err(DecodeError::Records(_))));
    }

    #[test]
    fn test_unsupported_magic() {
        let batch = RecordBatchBuilder::new().record(None, bytes("x")).build().unwrap();
        let mut batch = BytesMut::from(&batch[..]);
        batch[16] = 7;
        assert_eq!(decode_records(batch.freeze()), Err(DecodeError::UnsupportedMagic(7)));
    }

    #[test]
    fn test_base_offset_at_i64_max_is_refused() {
        // base offset sits outside the CRC; a valid batch can carry any value
        let batch = RecordBatchBuilder::new()
            .record(None, bytes("a"))
            .record(None, bytes("b"))
            .build()
            .unwrap();
        let mut batch = BytesMut::from(&batch[..]);
        batch[..8].copy_from_slice(&i64::MAX.to_be_bytes());

        assert_eq!(
            decode_records(batch.freeze()),
            Err(DecodeError::DeltaOverflow {
                field: "base offset",
                base: i64::MAX
            })
        );
    }

    #[test]
    fn test_first_timestamp_at_i64_min_is_refused() {
        let batch = RecordBatchBuilder::new()
            .base_timestamp(i64::MIN)
            .record(None, bytes("a"))
            .build()
            .unwrap();

        assert!(matches!(
            decode_records(batch),
            Err(DecodeError::DeltaOverflow {
                field: "first timestamp",
                ..
            })
        ));
    }

    #[test]
    fn test_large_in_range_base_offset_decodes() {
        let base = i64::MAX - i64::from(i32::MAX);
        let batch = RecordBatchBuilder::new()
            .base_offset(base)
            .record(None, bytes("a"))
            .build()
            .unwrap();

        let decoded = decode_records(batch).unwrap();
        assert_eq!(decoded.records[0].offset, base);
    }

    #[test]
    fn test_record_count_beyond_batch_size_is_refused() {
        let batch = RecordBatchBuilder::new().record(None, bytes("a")).build().unwrap();
        let mut batch = BytesMut::from(&batch[..]);
        batch[57..61].copy_from_slice(&i32::MAX.to_be_bytes());

        assert!(matches!(
            decode_records(batch.freeze()),
            Err(DecodeError::InvalidLength {
                field: "record count",
                ..
            })
        ));
    }

    #[test]
    fn test_header_count_beyond_record_size_is_refused() {
        let batch = RecordBatchBuilder::new().record(None, bytes("abcdef")).build().unwrap();
        let mut batch = BytesMut::from(&batch[..]);
        // the record ends with value length, value and header count; keep
        // its size but shrink the value to make room for a huge count
        let tail = batch.len() - 8;
        assert_eq!(&batch[tail..], &[0x0c, b'a', b'b', b'c', b'd', b'e', b'f', 0x00]);
        batch[tail..].copy_from_slice(&[0x04, b'a', b'b', 0xfe, 0xff, 0xff, 0xff, 0x0f]);

        assert!(matches!(
            decode_records(batch.freeze()),
            Err(DecodeError::InvalidLength {
                field: "header count",
                ..
            })
        ));
    }

    #[test]
    fn test_read_varint() {
        let mut buf: &[u8] = &[0x00, 0x01, 0x02, 0xfe, 0xff, 0xff, 0xff, 0x0f, 0x80];
        assert_eq!(read_varint(&mut buf), Some(0));
        assert_eq!(read_varint(&mut buf), Some(-1));
        assert_eq!(read_varint(&mut buf), Some(1));
        assert_eq!(read_varint(&mut buf), Some(i32::MAX));
        assert_eq!(read_varint(&mut buf), None);
    }

    #[test]
    fn test_control_batch_yields_markers_only() {
        let batch = RecordBatchBuilder::new()
            .transactional(4000, 0)
            .control()
            .record(
                Some(ControlRecord::encode_key(0, CONTROL_TYPE_COMMIT)),
                Some(ControlRecord::encode_value(TransactionMarker {
                    version: 0,
                    coordinator_epoch: 5,
                })),
            )
            .build()
            .unwrap();

        let decoded = decode_records(batch).unwrap();
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.control_records.len(), 1);
        assert_eq!(
            decoded.control_records[0].kind,
            ControlRecordKind::Commit(TransactionMarker {
                version: 0,
                coordinator_epoch: 5
            })
        );
    }

    #[test]
    fn test_control_batch_with_unknown_type() {
        let batch = RecordBatchBuilder::new()
            .control()
            .record(Some(ControlRecord::encode_key(0, 9)), bytes("opaque"))
            .build()
            .unwrap();

        let decoded = decode_records(batch).unwrap();
        assert_eq!(decoded.control_records[0].kind, ControlRecordKind::Unknown);
    }

    #[test]
    fn test_decode_legacy_v0() {
        let set = MessageSetBuilder::new(0)
            .message(bytes("k"), bytes("v"))
            .message(None, None)
            .build()
            .unwrap();

        let decoded = decode_records(set).unwrap();
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].key, bytes("k"));
        assert_eq!(decoded.records[0].value, bytes("v"));
        assert_eq!(decoded.records[0].timestamp, -1);
        assert_eq!(decoded.records[1].key, None);
        assert_eq!(decoded.records[1].value, None);
    }

    #[test]
    fn test_decode_legacy_v1_timestamp() {
        let set = MessageSetBuilder::new(1)
            .timestamp(42)
            .message(None, bytes("v"))
            .build()
            .unwrap();

        let decoded = decode_records(set).unwrap();
        assert_eq!(decoded.records[0].timestamp, 42);
        assert_eq!(decoded.records[0].value, bytes("v"));
    }

    #[test]
    fn test_decode_compressed_legacy_set() {
        let set = MessageSetBuilder::new(1)
            .compression(Compression::Gzip)
            .message(None, bytes("first"))
            .message(None, bytes("second"))
            .build()
            .unwrap();

        let decoded = decode_records(set).unwrap();
        let values: Vec<_> = decoded.records.iter().map(|r| r.value.clone()).collect();
        assert_eq!(values, vec![bytes("first"), bytes("second")]);
    }

    #[test]
    fn test_legacy_crc_mismatch() {
        let set = MessageSetBuilder::new(1).message(None, bytes("v")).build().unwrap();
        let mut set = BytesMut::from(&set[..]);
        let last = set.len() - 1;
        set[last] = b'x';

        assert!(matches!(decode_records(set.freeze()), Err(DecodeError::Records(_))));
    }

    #[test]
    fn test_empty_buffer_decodes_nothing() {
        assert_eq!(decode_records(Bytes::new()).unwrap(), DecodedRecords::default());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_single_record_round_trip(
                key in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
                value in proptest::collection::vec(any::<u8>(), 0..512),
            ) {
                let batch = RecordBatchBuilder::new()
                    .record(key.clone().map(Bytes::from), Some(Bytes::from(value.clone())))
                    .build()
                    .unwrap();

                let decoded = decode_records(batch).unwrap();
                prop_assert_eq!(decoded.records.len(), 1);
                prop_assert_eq!(decoded.records[0].key.as_deref(), key.as_deref());
                prop_assert_eq!(decoded.records[0].value.as_deref(), Some(value.as_slice()));
            }

            #[test]
            fn prop_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode_records(Bytes::from(data));
            }
        }
    }
}
