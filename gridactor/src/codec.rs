//! Pluggable payload serialization.
//!
//! Application payloads travel through mailboxes and streams as opaque
//! bytes. [`MessageCodec`] is the seam for the encoding; [`JsonCodec`] is
//! the default used by route tables, registry records and frames.
//!
//! # Example
//!
//! ```rust
//! use gridactor::codec::{JsonCodec, MessageCodec};
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&vec![1u32, 2, 3]).unwrap();
//! let decoded: Vec<u32> = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, vec![1, 2, 3]);
//! ```

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Pluggable message serialization format.
///
/// Requires `Clone + Send + Sync + 'static` so codec instances can be held
/// by route tables shared between actor tasks.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable value to bytes.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable value.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
