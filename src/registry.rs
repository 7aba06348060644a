//! Type registry: per-oid text and binary decoders.
//!
//! The registry is an explicit object shared through an `Arc` by the pool and
//! every decode call site. Entries can be replaced at runtime, which is how
//! drivers are configured for servers with nonstandard oids and how binary
//! decoding is switched off to compare against the text path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec::builtin_catalog;
use crate::error::{DecodeError, PgError, PgResult};
use crate::types::{Oid, PgValue};

/// A decode function for one wire format.
///
/// Receives the raw column payload; its length is the declared length.
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<PgValue, DecodeError> + Send + Sync>;

// ============================================================================
// Transcoder Entry
// ============================================================================

/// Decoding strategies for one type.
#[derive(Clone)]
pub struct TranscoderEntry {
    name: &'static str,
    text: Option<DecodeFn>,
    binary: Option<DecodeFn>,
}

impl TranscoderEntry {
    /// Create an entry with no decoders.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            text: None,
            binary: None,
        }
    }

    pub fn with_text<F>(mut self, decode: F) -> Self
    where
        F: Fn(&[u8]) -> Result<PgValue, DecodeError> + Send + Sync + 'static,
    {
        self.text = Some(Arc::new(decode));
        self
    }

    pub fn with_binary<F>(mut self, decode: F) -> Self
    where
        F: Fn(&[u8]) -> Result<PgValue, DecodeError> + Send + Sync + 'static,
    {
        self.binary = Some(Arc::new(decode));
        self
    }

    /// Type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn text_decoder(&self) -> Option<DecodeFn> {
        self.text.clone()
    }

    pub fn binary_decoder(&self) -> Option<DecodeFn> {
        self.binary.clone()
    }

    /// A type with neither decoder can't be read.
    pub fn is_supported(&self) -> bool {
        self.text.is_some() || self.binary.is_some()
    }
}

impl fmt::Debug for TranscoderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscoderEntry")
            .field("name", &self.name)
            .field("text", &self.text.is_some())
            .field("binary", &self.binary.is_some())
            .finish()
    }
}

/// Binary decoders taken out of a registry, to be put back later.
#[derive(Default)]
pub struct BinaryDecoders {
    decoders: HashMap<Oid, DecodeFn>,
}

impl BinaryDecoders {
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.decoders.contains_key(&oid)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Mapping from type oid to its transcoder entry.
///
/// Lookups clone the entry out from under the read lock, so decoding never
/// runs while the lock is held and a reader sees either the old or the new
/// entry of a concurrent write.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<Oid, TranscoderEntry>>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in catalog installed.
    pub fn with_defaults() -> Self {
        Self {
            entries: RwLock::new(builtin_catalog().into_iter().collect()),
        }
    }

    /// Get the entry for a type.
    pub fn lookup(&self, oid: Oid) -> PgResult<TranscoderEntry> {
        self.entries
            .read()
            .get(&oid)
            .cloned()
            .ok_or(PgError::UnknownType(oid))
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.entries.read().contains_key(&oid)
    }

    pub fn has_binary_decoder(&self, oid: Oid) -> bool {
        self.entries
            .read()
            .get(&oid)
            .is_some_and(|entry| entry.binary.is_some())
    }

    /// Install or replace the whole entry for a type.
    pub fn register(&self, oid: Oid, entry: TranscoderEntry) {
        tracing::debug!(oid = oid.as_i32(), name = entry.name, "Registering transcoder");
        self.entries.write().insert(oid, entry);
    }

    /// Remove a type. Returns the entry that was installed, if any.
    pub fn remove(&self, oid: Oid) -> Option<TranscoderEntry> {
        tracing::debug!(oid = oid.as_i32(), "Removing transcoder");
        self.entries.write().remove(&oid)
    }

    pub fn set_text_decoder<F>(&self, oid: Oid, decode: F) -> PgResult<()>
    where
        F: Fn(&[u8]) -> Result<PgValue, DecodeError> + Send + Sync + 'static,
    {
        self.update(oid, |entry| entry.text = Some(Arc::new(decode)))
    }

    /// Remove the text decoder. Returns the previous one.
    pub fn clear_text_decoder(&self, oid: Oid) -> PgResult<Option<DecodeFn>> {
        self.update(oid, |entry| entry.text.take())
    }

    pub fn set_binary_decoder<F>(&self, oid: Oid, decode: F) -> PgResult<()>
    where
        F: Fn(&[u8]) -> Result<PgValue, DecodeError> + Send + Sync + 'static,
    {
        self.update(oid, |entry| entry.binary = Some(Arc::new(decode)))
    }

    /// Remove the binary decoder so the type is always read as text.
    /// Returns the previous one.
    pub fn clear_binary_decoder(&self, oid: Oid) -> PgResult<Option<DecodeFn>> {
        self.update(oid, |entry| entry.binary.take())
    }

    /// Strip every binary decoder, forcing all types onto the text path.
    pub fn take_binary_decoders(&self) -> BinaryDecoders {
        let mut entries = self.entries.write();
        let decoders: HashMap<Oid, DecodeFn> = entries
            .iter_mut()
            .filter_map(|(oid, entry)| entry.binary.take().map(|f| (*oid, f)))
            .collect();
        tracing::debug!(count = decoders.len(), "Binary decoders disabled");
        BinaryDecoders { decoders }
    }

    /// Put back decoders returned by `take_binary_decoders`.
    ///
    /// Types removed from the registry in the meantime are skipped.
    pub fn restore_binary_decoders(&self, saved: BinaryDecoders) {
        let mut entries = self.entries.write();
        let mut restored = 0usize;
        for (oid, decode) in saved.decoders {
            if let Some(entry) = entries.get_mut(&oid) {
                entry.binary = Some(decode);
                restored += 1;
            }
        }
        tracing::debug!(count = restored, "Binary decoders restored");
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All registered oids, sorted.
    pub fn oids(&self) -> Vec<Oid> {
        let mut oids: Vec<Oid> = self.entries.read().keys().copied().collect();
        oids.sort();
        oids
    }

    fn update<R>(&self, oid: Oid, f: impl FnOnce(&mut TranscoderEntry) -> R) -> PgResult<R> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&oid).ok_or(PgError::UnknownType(oid))?;
        tracing::trace!(oid = oid.as_i32(), name = entry.name, "Updating transcoder");
        Ok(f(entry))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .finish()
    }
}
