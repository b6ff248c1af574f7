//! # grove-codec
//!
//! Object state serialization for Grove.
//!
//! The codec turns one object's attribute map into a byte payload and
//! back. It is stateless across calls but parameterised with two
//! hooks:
//!
//! - on save, a [`SaveContext`] substitutes in-memory object
//!   references with OID stubs and extracts pending blob payloads
//!   into the transaction being written;
//! - on load, a [`LoadContext`] materialises OID stubs as live
//!   objects (creating ghosts for unknown OIDs) and rehydrates blob
//!   stubs as readable streams.
//!
//! The wire format is a `bincode`-encoded version record: the OID,
//! the object's kind tag, and the attribute map with references
//! replaced by stubs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
mod wire;

pub use codec::{BincodeCodec, LoadContext, LoadedVersion, ObjectCodec, SaveContext};
pub use error::{CodecError, CodecResult};
