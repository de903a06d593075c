//! Transaction marker records.
//!
//! A record batch with the control attribute set carries markers instead of
//! application data. The key always holds `version: i16, type: i16`. Only the
//! abort and commit types define a value layout; any other type is kept as
//! [`ControlRecordKind::Unknown`] and its value is never read.

use bytes::{Buf, Bytes};

use crate::error::{DecodeError, DecodeResult};

/// Size of the control record key.
const KEY_SIZE: usize = 4;

/// Size of a transaction marker value.
const MARKER_SIZE: usize = 6;

/// Control type of an aborted transaction.
pub const CONTROL_TYPE_ABORT: i16 = 0;

/// Control type of a committed transaction.
pub const CONTROL_TYPE_COMMIT: i16 = 1;

/// Value half of a known transaction marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionMarker {
    /// Version of the value layout.
    pub version: i16,
    /// Epoch of the transaction coordinator that wrote the marker.
    pub coordinator_epoch: i32,
}

/// What a control record marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRecordKind {
    Abort(TransactionMarker),
    Commit(TransactionMarker),
    /// A type outside the known set. The value has no defined layout.
    Unknown,
}

/// A decoded control record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRecord {
    /// Version of the key layout.
    pub version: i16,
    /// Raw type indicator from the key.
    pub type_id: i16,
    pub kind: ControlRecordKind,
}

impl ControlRecord {
    /// Decode a control record from its key and value.
    ///
    /// # Errors
    ///
    /// Fails if the key is shorter than four bytes, or if a known type comes
    /// with a missing or short value.
    pub fn decode(key: Option<&Bytes>, value: Option<&Bytes>) -> DecodeResult<Self> {
        let key = key.ok_or(DecodeError::InvalidLength {
            field: "control record key",
            length: -1,
        })?;
        let mut key = require(key, KEY_SIZE)?;
        let version = key.get_i16();
        let type_id = key.get_i16();

        let kind = match type_id {
            CONTROL_TYPE_ABORT => ControlRecordKind::Abort(Self::decode_marker(value)?),
            CONTROL_TYPE_COMMIT => ControlRecordKind::Commit(Self::decode_marker(value)?),
            _ => ControlRecordKind::Unknown,
        };

        Ok(Self {
            version,
            type_id,
            kind,
        })
    }

    fn decode_marker(value: Option<&Bytes>) -> DecodeResult<TransactionMarker> {
        let value = value.ok_or(DecodeError::InvalidLength {
            field: "control record value",
            length: -1,
        })?;
        let mut value = require(value, MARKER_SIZE)?;
        Ok(TransactionMarker {
            version: value.get_i16(),
            coordinator_epoch: value.get_i32(),
        })
    }

    /// Whether the marker commits a transaction.
    #[must_use]
    pub fn is_commit(&self) -> bool {
        matches!(self.kind, ControlRecordKind::Commit(_))
    }

    /// Coordinator epoch, present for known types only.
    #[must_use]
    pub fn coordinator_epoch(&self) -> Option<i32> {
        match self.kind {
            ControlRecordKind::Abort(marker) | ControlRecordKind::Commit(marker) => {
                Some(marker.coordinator_epoch)
            }
            ControlRecordKind::Unknown => None,
        }
    }

    /// Encode the key bytes for a marker of `type_id`.
    #[must_use]
    pub fn encode_key(version: i16, type_id: i16) -> Bytes {
        let mut key = Vec::with_capacity(4);
        key.extend_from_slice(&version.to_be_bytes());
        key.extend_from_slice(&type_id.to_be_bytes());
        Bytes::from(key)
    }

    /// Encode the value bytes of a transaction marker.
    #[must_use]
    pub fn encode_value(marker: TransactionMarker) -> Bytes {
        let mut value = Vec::with_capacity(6);
        value.extend_from_slice(&marker.version.to_be_bytes());
        value.extend_from_slice(&marker.coordinator_epoch.to_be_bytes());
        Bytes::from(value)
    }
}

fn require(bytes: &Bytes, needed: usize) -> DecodeResult<&[u8]> {
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    Ok(&bytes[..])
}
