//! Wire form of object state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One attribute value as stored on disk.
///
/// Mirrors `grove_object::Value` with the two live leaf kinds replaced
/// by stubs: object references become OIDs, blobs become their
/// location in the log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    Ref(u64),
    Stream { offset: u64, length: u64 },
}

/// One committed object version as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireVersion {
    pub oid: u64,
    pub kind: String,
    pub state: BTreeMap<String, WireValue>,
}
