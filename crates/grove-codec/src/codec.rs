//! The object codec and its reference hooks.

use std::collections::BTreeMap;

use grove_common::Oid;
use grove_object::{Blob, PRef, StateMap, Value};

use crate::error::{CodecError, CodecResult};
use crate::wire::{WireValue, WireVersion};

/// Save-side reference hook.
///
/// Implemented by the transaction writer: it knows how to attach and
/// number objects reached for the first time, and where blob payloads
/// land in the file.
pub trait SaveContext {
    /// Returns the OID to store for a referenced object, attaching it
    /// to the database and allocating an identifier if needed.
    fn object_ref(&mut self, obj: &PRef) -> CodecResult<Oid>;

    /// Persists a pending blob's payload and returns its
    /// (offset, length) in the log file.
    fn blob_ref(&mut self, blob: &Blob) -> CodecResult<(u64, u64)>;
}

/// Load-side reference hook.
///
/// Implemented by the database: OIDs resolve through the object
/// registry (creating ghosts for unknown identifiers) and blob stubs
/// through the log.
pub trait LoadContext {
    /// Materialises the object referenced by `oid`.
    fn object_ref(&self, oid: Oid) -> CodecResult<PRef>;

    /// Rehydrates a stored blob from its location.
    fn blob_ref(&self, offset: u64, length: u64) -> CodecResult<Blob>;
}

/// A decoded object version.
#[derive(Debug)]
pub struct LoadedVersion {
    /// The object's identifier.
    pub oid: Oid,
    /// The object's kind tag.
    pub kind: String,
    /// The decoded attribute map.
    pub state: StateMap,
}

/// Serializes object versions to byte payloads and back.
pub trait ObjectCodec: Send + Sync {
    /// Encodes one object version, substituting references through
    /// `cx`.
    fn save(
        &self,
        oid: Oid,
        kind: &str,
        state: &StateMap,
        cx: &mut dyn SaveContext,
    ) -> CodecResult<Vec<u8>>;

    /// Decodes one object version, resolving references through `cx`.
    fn load(&self, payload: &[u8], cx: &dyn LoadContext) -> CodecResult<LoadedVersion>;
}

/// The default codec: `bincode` over the wire value tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl BincodeCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }

    fn save_value(value: &Value, cx: &mut dyn SaveContext) -> CodecResult<WireValue> {
        Ok(match value {
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int(n) => WireValue::Int(*n),
            Value::Float(x) => WireValue::Float(*x),
            Value::Text(s) => WireValue::Text(s.clone()),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Self::save_value(item, cx)?);
                }
                WireValue::List(out)
            }
            Value::Map(map) => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    out.insert(key.clone(), Self::save_value(item, cx)?);
                }
                WireValue::Map(out)
            }
            Value::Object(obj) => WireValue::Ref(cx.object_ref(obj)?.as_u64()),
            Value::Blob(blob) => match blob.slice() {
                // Already committed: store its existing location.
                Some(slice) => WireValue::Stream {
                    offset: slice.offset(),
                    length: slice.length(),
                },
                None => {
                    let (offset, length) = cx.blob_ref(blob)?;
                    WireValue::Stream { offset, length }
                }
            },
        })
    }

    fn load_value(value: WireValue, cx: &dyn LoadContext) -> CodecResult<Value> {
        Ok(match value {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(n) => Value::Int(n),
            WireValue::Float(x) => Value::Float(x),
            WireValue::Text(s) => Value::Text(s),
            WireValue::Bytes(b) => Value::Bytes(b),
            WireValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Self::load_value(item, cx)?);
                }
                Value::List(out)
            }
            WireValue::Map(map) => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    out.insert(key, Self::load_value(item, cx)?);
                }
                Value::Map(out)
            }
            WireValue::Ref(oid) => Value::Object(cx.object_ref(Oid::new(oid))?),
            WireValue::Stream { offset, length } => Value::Blob(cx.blob_ref(offset, length)?),
        })
    }
}

impl ObjectCodec for BincodeCodec {
    fn save(
        &self,
        oid: Oid,
        kind: &str,
        state: &StateMap,
        cx: &mut dyn SaveContext,
    ) -> CodecResult<Vec<u8>> {
        let mut wire_state = BTreeMap::new();
        for (key, value) in state {
            wire_state.insert(key.clone(), Self::save_value(value, cx)?);
        }

        let version = WireVersion {
            oid: oid.as_u64(),
            kind: kind.to_string(),
            state: wire_state,
        };
        bincode::serialize(&version).map_err(CodecError::encode)
    }

    fn load(&self, payload: &[u8], cx: &dyn LoadContext) -> CodecResult<LoadedVersion> {
        let version: WireVersion = bincode::deserialize(payload).map_err(CodecError::decode)?;

        let mut state = StateMap::new();
        for (key, value) in version.state {
            state.insert(key, Self::load_value(value, cx)?);
        }

        Ok(LoadedVersion {
            oid: Oid::new(version.oid),
            kind: version.kind,
            state,
        })
    }
}
