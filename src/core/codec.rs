//! Codec entries: a serialize/deserialize pair plus the type's size class.

use crate::error::{ProtocolError, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Serializer half of a codec.
pub type SerializeFn<T> = Arc<dyn Fn(&T) -> Result<Bytes> + Send + Sync + 'static>;

/// Deserializer half of a codec.
pub type DeserializeFn<T> = Arc<dyn Fn(&[u8]) -> Result<T> + Send + Sync + 'static>;

/// Serialize/deserialize pair for `T`.
///
/// `fixed_size` is `Some(n)` when every encoding of `T` is exactly `n` bytes,
/// `None` for variable-length types. Entries are immutable and cheap to clone.
pub struct CodecEntry<T> {
    fixed_size: Option<u32>,
    serialize: SerializeFn<T>,
    deserialize: DeserializeFn<T>,
}

impl<T> Clone for CodecEntry<T> {
    fn clone(&self) -> Self {
        Self {
            fixed_size: self.fixed_size,
            serialize: Arc::clone(&self.serialize),
            deserialize: Arc::clone(&self.deserialize),
        }
    }
}

impl<T> fmt::Debug for CodecEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecEntry")
            .field("type", &std::any::type_name::<T>())
            .field("fixed_size", &self.fixed_size)
            .finish()
    }
}

impl<T> CodecEntry<T> {
    pub fn new<S, D>(fixed_size: Option<u32>, serialize: S, deserialize: D) -> Self
    where
        S: Fn(&T) -> Result<Bytes> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            fixed_size,
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        }
    }

    /// Encoded width for fixed-size types, `None` for variable-size types.
    pub fn fixed_size(&self) -> Option<u32> {
        self.fixed_size
    }

    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size.is_some()
    }

    /// Encode `value`.
    ///
    /// # Errors
    /// Returns `ProtocolError::CodecError` if a fixed-size serializer produced
    /// a different number of bytes than it declared, or whatever the
    /// underlying serializer reports.
    pub fn serialize(&self, value: &T) -> Result<Bytes> {
        let bytes = (self.serialize)(value)?;
        if let Some(size) = self.fixed_size {
            if bytes.len() != size as usize {
                return Err(ProtocolError::CodecError(format!(
                    "{} serializer produced {} bytes, declared fixed size is {size}",
                    std::any::type_name::<T>(),
                    bytes.len()
                )));
            }
        }
        Ok(bytes)
    }

    /// Decode a value from exactly `buf`.
    ///
    /// # Errors
    /// Returns `ProtocolError::CodecError` if `buf` does not match the fixed
    /// size of `T`, or if the underlying deserializer rejects it.
    pub fn deserialize(&self, buf: &[u8]) -> Result<T> {
        if let Some(size) = self.fixed_size {
            if buf.len() != size as usize {
                return Err(ProtocolError::CodecError(format!(
                    "{} requires exactly {size} bytes, got {}",
                    std::any::type_name::<T>(),
                    buf.len()
                )));
            }
        }
        (self.deserialize)(buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lying_entry() -> CodecEntry<u16> {
        CodecEntry::new(
            Some(2),
            |v: &u16| Ok(Bytes::copy_from_slice(&u32::from(*v).to_le_bytes())),
            |buf: &[u8]| Ok(u16::from_le_bytes([buf[0], buf[1]])),
        )
    }

    #[test]
    fn test_fixed_size_output_is_checked() {
        let entry = lying_entry();
        assert!(matches!(
            entry.serialize(&7),
            Err(ProtocolError::CodecError(_))
        ));
    }

    #[test]
    fn test_fixed_size_input_is_checked() {
        let entry = lying_entry();
        assert!(matches!(
            entry.deserialize(&[1, 2, 3]),
            Err(ProtocolError::CodecError(_))
        ));
        assert_eq!(entry.deserialize(&[1, 0]).unwrap(), 1);
    }

    #[test]
    fn test_clone_shares_functions() {
        let entry = lying_entry();
        let copy = entry.clone();
        assert_eq!(copy.fixed_size(), Some(2));
        assert!(copy.is_fixed_size());
    }
}
