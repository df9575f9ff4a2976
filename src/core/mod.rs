//! # Core Codec Components
//!
//! Typed binary codecs and the registry that hands them out.
//!
//! ## Components
//! - **CodecEntry**: serialize/deserialize pair plus fixed or variable size class
//! - **CodecRegistry**: shared, read-mostly map from Rust type to codec
//! - **Sequences**: `Vec<T>` codecs derived from the element codec on demand
//! - **Serde codecs**: bincode-backed entries for application records
//!
//! ## Wire Format
//! ```text
//! integers, floats:  little-endian, natural width
//! bool:              1 byte, 0 = false, anything else = true
//! String:            UTF-8 bytes, no length (framed by the caller)
//! Vec<T>:            [count:u32 LE] then raw elements (fixed T) or [len:u32 LE][bytes] (variable T)
//! ```

pub mod codec;
mod primitives;
pub mod registry;
pub mod sequence;
pub mod serialization;

pub use codec::CodecEntry;
pub use registry::CodecRegistry;
pub use sequence::derive_sequence;
pub use serialization::serde_entry;
