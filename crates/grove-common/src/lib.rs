//! # grove-common
//!
//! Common types and constants for Grove.
//!
//! This crate provides the foundational identifier types used across
//! all Grove components:
//!
//! - **`Oid`**: process-independent identity of a persistent object
//! - **`Serial`**: per-object version counter
//! - **`TxId`**: file-level transaction identifier
//!
//! ## Example
//!
//! ```rust
//! use grove_common::{Oid, Serial, TxId};
//!
//! let oid = Oid::new(42);
//! let serial = Serial::new(1);
//! let txid = TxId::new(1);
//! assert!(oid.is_valid() && serial.is_valid() && txid.is_valid());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

pub use types::{Oid, Serial, TxId};
