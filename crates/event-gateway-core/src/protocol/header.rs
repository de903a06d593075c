//! The identifying header of an intercepted request.

use bytes::Buf;

/// API key of a Produce request.
pub const PRODUCE: i16 = 0;

/// API key of a Metadata request.
pub const METADATA: i16 = 3;

/// API key of a FindCoordinator request.
pub const FIND_COORDINATOR: i16 = 10;

/// Bytes occupied by [`RequestKeyVersion`] on the wire.
pub const REQUEST_KEY_VERSION_SIZE: usize = 8;

/// Length prefix, API key and API version of a request.
///
/// This is the smallest prefix of a request that tells the interceptor
/// whether the rest of the frame is worth looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestKeyVersion {
    /// Declared size of the request, excluding the length field itself.
    pub length: i32,
    /// API key.
    pub api_key: i16,
    /// API version.
    pub api_version: i16,
}

impl RequestKeyVersion {
    /// Read the header from its 8 wire bytes.
    #[must_use]
    pub fn from_bytes(raw: [u8; REQUEST_KEY_VERSION_SIZE]) -> Self {
        let mut buf = &raw[..];
        Self {
            length: buf.get_i32(),
            api_key: buf.get_i16(),
            api_version: buf.get_i16(),
        }
    }

    /// Whether this is a Produce request.
    #[must_use]
    pub fn is_produce(&self) -> bool {
        self.api_key == PRODUCE
    }

    /// Bytes of the request following the API key and version.
    ///
    /// Negative or undersized lengths yield `None`; the frame is broken.
    #[must_use]
    pub fn body_len(&self) -> Option<usize> {
        usize::try_from(self.length).ok()?.checked_sub(4)
    }
}
