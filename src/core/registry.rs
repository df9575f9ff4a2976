//! # Codec Registry
//!
//! Maps a Rust type to its [`CodecEntry`] and caches derived sequence codecs.
//!
//! The registry is built once, shared behind an `Arc`, and read by every
//! connection concurrently. Entries are never removed. Sequence entries are
//! derived on first request outside any lock; if two callers race on the same
//! element type both build equivalent entries and whichever is inserted first
//! is kept.

use crate::core::codec::CodecEntry;
use crate::core::primitives::builtin_table;
use crate::core::sequence::derive_sequence;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use bytes::Bytes;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Type-erased `Arc<CodecEntry<T>>`.
pub(crate) type ErasedEntry = Arc<dyn Any + Send + Sync>;

struct Registered {
    type_name: &'static str,
    fixed_size: Option<u32>,
    entry: ErasedEntry,
}

pub struct CodecRegistry {
    entries: RwLock<HashMap<TypeId, Registered>>,
    // keyed by element type
    sequences: RwLock<HashMap<TypeId, ErasedEntry>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

impl CodecRegistry {
    /// Registry pre-populated with the built-in primitive codecs.
    pub fn new() -> Self {
        let registry = Self::empty();
        if let Ok(mut entries) = registry.entries.write() {
            for builtin in builtin_table() {
                entries.insert(
                    builtin.type_id,
                    Registered {
                        type_name: builtin.type_name,
                        fixed_size: builtin.fixed_size,
                        entry: builtin.entry,
                    },
                );
            }
        }
        registry
    }

    /// Registry with no codecs at all.
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sequences: RwLock::new(HashMap::new()),
        }
    }

    /// Register a codec for `T` from its parts.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigurationError` if `T` already has a codec.
    pub fn register<T, S, D>(&self, fixed_size: Option<u32>, serialize: S, deserialize: D) -> Result<()>
    where
        T: Send + Sync + 'static,
        S: Fn(&T) -> Result<Bytes> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
    {
        self.register_entry(CodecEntry::new(fixed_size, serialize, deserialize))
    }

    /// Register a prebuilt entry for `T`.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigurationError` if `T` already has a codec
    /// or declares a fixed size of zero bytes.
    pub fn register_entry<T>(&self, entry: CodecEntry<T>) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        if entry.fixed_size() == Some(0) {
            return Err(ProtocolError::ConfigurationError(format!(
                "{} ({})",
                constants::ERR_ZERO_WIDTH,
                type_name::<T>()
            )));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_WRITE_LOCK))?;

        if entries.contains_key(&TypeId::of::<T>()) {
            return Err(ProtocolError::ConfigurationError(format!(
                "Type {} is already registered",
                type_name::<T>()
            )));
        }

        debug!(
            codec = type_name::<T>(),
            fixed_size = ?entry.fixed_size(),
            "Registering codec"
        );
        entries.insert(
            TypeId::of::<T>(),
            Registered {
                type_name: type_name::<T>(),
                fixed_size: entry.fixed_size(),
                entry: Arc::new(entry),
            },
        );
        Ok(())
    }

    /// Look up the codec for `T`.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigurationError` if `T` was never registered.
    pub fn get<T>(&self) -> Result<Arc<CodecEntry<T>>>
    where
        T: Send + Sync + 'static,
    {
        let erased = {
            let entries = self
                .entries
                .read()
                .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))?;
            entries
                .get(&TypeId::of::<T>())
                .map(|registered| Arc::clone(&registered.entry))
                .ok_or_else(|| {
                    ProtocolError::ConfigurationError(format!(
                        "No codec registered for {}",
                        type_name::<T>()
                    ))
                })?
        };
        downcast(erased)
    }

    /// The cached `Vec<T>` codec, derived from `T`'s codec on first use.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigurationError` if `T` was never registered.
    pub fn sequence_of<T>(&self) -> Result<Arc<CodecEntry<Vec<T>>>>
    where
        T: Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();
        {
            let sequences = self
                .sequences
                .read()
                .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))?;
            if let Some(found) = sequences.get(&key) {
                return downcast(Arc::clone(found));
            }
        }

        let base = self.get::<T>()?;
        let derived: ErasedEntry = Arc::new(derive_sequence(base.as_ref()));

        let winner = {
            let mut sequences = self
                .sequences
                .write()
                .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_WRITE_LOCK))?;
            Arc::clone(sequences.entry(key).or_insert(derived))
        };
        debug!(element = type_name::<T>(), "Derived sequence codec");
        downcast(winner)
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(&TypeId::of::<T>()))
            .unwrap_or(false)
    }

    /// Fixed width of `T`'s encoding, `None` for variable-size types.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigurationError` if `T` was never registered.
    pub fn fixed_size_of<T: Send + Sync + 'static>(&self) -> Result<Option<u32>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))?;
        entries
            .get(&TypeId::of::<T>())
            .map(|registered| registered.fixed_size)
            .ok_or_else(|| {
                ProtocolError::ConfigurationError(format!(
                    "No codec registered for {}",
                    type_name::<T>()
                ))
            })
    }

    /// Names of all registered (non-derived) types, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .entries
            .read()
            .map(|entries| entries.values().map(|r| r.type_name).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    pub fn serialize<T: Send + Sync + 'static>(&self, value: &T) -> Result<Bytes> {
        self.get::<T>()?.serialize(value)
    }

    /// Decode a `T`. Rejected payloads are counted in the codec error metric.
    pub fn deserialize<T: Send + Sync + 'static>(&self, buf: &[u8]) -> Result<T> {
        self.get::<T>()?.deserialize(buf).inspect_err(count_codec_error)
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize_sequence<T: Send + Sync + 'static>(&self, items: &Vec<T>) -> Result<Bytes> {
        self.sequence_of::<T>()?.serialize(items)
    }

    pub fn deserialize_sequence<T: Send + Sync + 'static>(&self, buf: &[u8]) -> Result<Vec<T>> {
        self.sequence_of::<T>()?
            .deserialize(buf)
            .inspect_err(count_codec_error)
    }
}

fn count_codec_error(e: &ProtocolError) {
    if matches!(e, ProtocolError::CodecError(_)) {
        global_metrics().codec_error();
    }
}

fn downcast<T>(erased: ErasedEntry) -> Result<Arc<CodecEntry<T>>>
where
    T: Send + Sync + 'static,
{
    erased.downcast::<CodecEntry<T>>().map_err(|_| {
        ProtocolError::ConfigurationError(format!(
            "{} ({})",
            constants::ERR_ENTRY_TYPE_MISMATCH,
            type_name::<T>()
        ))
    })
}
