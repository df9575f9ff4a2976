//! # Serde-backed Codecs
//!
//! Lets applications register any `serde` type as a variable-size codec, so
//! records can travel as message payloads or as sequence elements without a
//! hand-written serializer pair.
//!
//! Encoding is bincode (little-endian, fixed-width integers), matching the
//! byte order of the built-in codecs.
//!
//! ## Usage
//! ```rust
//! use protoforge::core::CodecRegistry;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Chat {
//!     from: String,
//!     body: String,
//! }
//!
//! let registry = CodecRegistry::new();
//! registry.register_serde::<Chat>().unwrap();
//!
//! let msgs = vec![Chat { from: "a".into(), body: "hi".into() }];
//! let bytes = registry.serialize_sequence(&msgs).unwrap();
//! assert_eq!(registry.deserialize_sequence::<Chat>(&bytes).unwrap(), msgs);
//! ```

use crate::core::codec::CodecEntry;
use crate::core::registry::CodecRegistry;
use crate::error::{ProtocolError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Build a variable-size bincode codec for `T`.
pub fn serde_entry<T>() -> CodecEntry<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    CodecEntry::new(
        None,
        |value: &T| {
            bincode::serialize(value)
                .map(Bytes::from)
                .map_err(|e| ProtocolError::CodecError(format!("bincode encode: {e}")))
        },
        |buf: &[u8]| {
            bincode::deserialize(buf)
                .map_err(|e| ProtocolError::CodecError(format!("bincode decode: {e}")))
        },
    )
}

impl CodecRegistry {
    /// Register `T` using its serde implementation.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigurationError` if `T` already has a codec.
    pub fn register_serde<T>(&self) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.register_entry(serde_entry::<T>())
    }
}
