//! # Sequence Codecs
//!
//! Derives a `Vec<T>` codec from the codec of `T` by closing over the element's
//! serializer and deserializer.
//!
//! ## Wire Format
//! ```text
//! fixed-size elements:     [count:u32 LE] [elem_0] [elem_1] ...
//! variable-size elements:  [count:u32 LE] [len_0:u32 LE] [elem_0] [len_1:u32 LE] [elem_1] ...
//! ```
//!
//! The derived entry is itself variable-size, so it can be nested.

use crate::core::codec::CodecEntry;
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of every count and length prefix on the wire.
pub const PREFIX_LEN: usize = 4;

/// Build the sequence codec for `base`.
///
/// Construction is pure: calling it twice for the same element type yields two
/// behaviorally identical entries.
pub fn derive_sequence<T>(base: &CodecEntry<T>) -> CodecEntry<Vec<T>>
where
    T: 'static,
{
    let ser_base = base.clone();
    let de_base = base.clone();

    CodecEntry::new(
        None,
        move |items: &Vec<T>| serialize_sequence(&ser_base, items),
        move |buf: &[u8]| deserialize_sequence(&de_base, buf),
    )
}

fn serialize_sequence<T>(base: &CodecEntry<T>, items: &[T]) -> Result<Bytes> {
    let count = u32::try_from(items.len())
        .map_err(|_| ProtocolError::CodecError(constants::ERR_SEQUENCE_TOO_LONG.into()))?;

    let capacity = match base.fixed_size() {
        Some(size) => PREFIX_LEN + items.len() * size as usize,
        None => PREFIX_LEN + items.len() * PREFIX_LEN,
    };
    let mut out = BytesMut::with_capacity(capacity);
    out.put_u32_le(count);

    for item in items {
        let encoded = base.serialize(item)?;
        if !base.is_fixed_size() {
            let len = u32::try_from(encoded.len())
                .map_err(|_| ProtocolError::CodecError(constants::ERR_ELEMENT_TOO_LONG.into()))?;
            out.put_u32_le(len);
        }
        out.put_slice(&encoded);
    }

    Ok(out.freeze())
}

fn deserialize_sequence<T>(base: &CodecEntry<T>, buf: &[u8]) -> Result<Vec<T>> {
    let mut cursor = buf;
    if cursor.remaining() < PREFIX_LEN {
        return Err(ProtocolError::CodecError(constants::ERR_MISSING_COUNT.into()));
    }
    let count = cursor.get_u32_le() as usize;
    if base.fixed_size() == Some(0) && count > 0 {
        return Err(ProtocolError::CodecError(constants::ERR_ZERO_WIDTH.into()));
    }

    // A hostile count must not drive the allocation; every element needs at
    // least one byte (fixed) or one prefix (variable).
    let min_element = base
        .fixed_size()
        .map(|size| size.max(1) as usize)
        .unwrap_or(PREFIX_LEN);
    let mut items = Vec::with_capacity(count.min(cursor.remaining() / min_element));

    for index in 0..count {
        let len = match base.fixed_size() {
            Some(size) => size as usize,
            None => {
                if cursor.remaining() < PREFIX_LEN {
                    return Err(ProtocolError::CodecError(format!(
                        "{} (element {index} of {count})",
                        constants::ERR_MISSING_LENGTH
                    )));
                }
                cursor.get_u32_le() as usize
            }
        };

        if cursor.remaining() < len {
            return Err(ProtocolError::CodecError(format!(
                "Truncated sequence: element {index} of {count} needs {len} bytes, {} left",
                cursor.remaining()
            )));
        }

        items.push(base.deserialize(&cursor[..len])?);
        cursor.advance(len);
    }

    if cursor.has_remaining() {
        return Err(ProtocolError::CodecError(format!(
            "{} trailing bytes after a sequence of {count} elements",
            cursor.remaining()
        )));
    }

    Ok(items)
}
