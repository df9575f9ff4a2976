//! Built-in codecs registered into every new [`CodecRegistry`](super::CodecRegistry).
//!
//! Integers and floats are little-endian at their natural width, `bool` is a
//! single byte (zero is false), `String` is bare UTF-8 whose length comes from
//! the enclosing frame or sequence prefix.

use crate::core::codec::CodecEntry;
use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;
use std::any::{type_name, TypeId};

/// One row of the built-in table, already type-erased for registry insertion.
pub(crate) struct BuiltinCodec {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub fixed_size: Option<u32>,
    pub entry: super::registry::ErasedEntry,
}

impl BuiltinCodec {
    fn of<T: Send + Sync + 'static>(entry: CodecEntry<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            fixed_size: entry.fixed_size(),
            entry: std::sync::Arc::new(entry),
        }
    }
}

macro_rules! le_codec {
    ($ty:ty) => {
        BuiltinCodec::of::<$ty>(CodecEntry::new(
            Some(std::mem::size_of::<$ty>() as u32),
            |value: &$ty| Ok(Bytes::copy_from_slice(&value.to_le_bytes())),
            |buf: &[u8]| {
                let raw: [u8; std::mem::size_of::<$ty>()] =
                    buf.try_into().map_err(|_| width_error::<$ty>(buf.len()))?;
                Ok(<$ty>::from_le_bytes(raw))
            },
        ))
    };
}

fn width_error<T>(got: usize) -> ProtocolError {
    ProtocolError::CodecError(format!(
        "Parsing {} requires exactly {} bytes, got {got}",
        type_name::<T>(),
        std::mem::size_of::<T>()
    ))
}

fn bool_codec() -> CodecEntry<bool> {
    CodecEntry::new(
        Some(1),
        |value: &bool| Ok(Bytes::copy_from_slice(&[u8::from(*value)])),
        |buf: &[u8]| match buf {
            [byte] => Ok(*byte != 0),
            _ => Err(width_error::<bool>(buf.len())),
        },
    )
}

fn string_codec() -> CodecEntry<String> {
    CodecEntry::new(
        None,
        |value: &String| Ok(Bytes::copy_from_slice(value.as_bytes())),
        |buf: &[u8]| decode_utf8(buf),
    )
}

fn decode_utf8(buf: &[u8]) -> Result<String> {
    std::str::from_utf8(buf)
        .map(str::to_owned)
        .map_err(|e| ProtocolError::CodecError(format!("{}: {e}", constants::ERR_INVALID_UTF8)))
}

/// The fixed startup table.
pub(crate) fn builtin_table() -> Vec<BuiltinCodec> {
    vec![
        le_codec!(u8),
        le_codec!(i8),
        BuiltinCodec::of(bool_codec()),
        le_codec!(u16),
        le_codec!(i16),
        le_codec!(u32),
        le_codec!(i32),
        le_codec!(u64),
        le_codec!(i64),
        le_codec!(f32),
        le_codec!(f64),
        BuiltinCodec::of(string_codec()),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_unique_types() {
        let table = builtin_table();
        let mut ids: Vec<TypeId> = table.iter().map(|c| c.type_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), table.len());
    }

    #[test]
    fn test_size_classes() {
        for codec in builtin_table() {
            if codec.type_id == TypeId::of::<String>() {
                assert_eq!(codec.fixed_size, None, "{}", codec.type_name);
            } else {
                assert!(codec.fixed_size.is_some(), "{}", codec.type_name);
            }
        }
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        let codec = bool_codec();
        assert!(codec.deserialize(&[0x7F]).unwrap());
        assert!(!codec.deserialize(&[0]).unwrap());
        assert_eq!(codec.serialize(&true).unwrap().as_ref(), &[1]);
    }

    #[test]
    fn test_invalid_utf8() {
        let codec = string_codec();
        assert!(matches!(
            codec.deserialize(&[0xFF, 0xFE]),
            Err(ProtocolError::CodecError(_))
        ));
    }
}
