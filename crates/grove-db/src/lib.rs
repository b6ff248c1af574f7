//! # grove-db
//!
//! An embeddable, transactional object-graph database.
//!
//! Grove persists a graph of dynamic-attribute objects onto a single
//! append-only log file, provides MVCC across threads within a process
//! and across processes sharing the same file, and serves reads
//! against in-memory shared state with copy-on-write overlays for
//! writers.
//!
//! ## Model
//!
//! - Objects are created detached ([`Persistent::new`]) and join the
//!   database when they become reachable from the root.
//! - Reads are plain attribute lookups and never block writers.
//! - Writes require a [`checkout`](Database::checkout), which gives
//!   the calling thread a private overlay.
//! - [`commit`](Database::commit) appends the transaction to the log
//!   under an exclusive commit lock with first-committer-wins
//!   semantics; kinds that register a [`ConflictResolver`] can merge
//!   concurrent writes instead of failing them.
//! - [`begin`](Database::begin) makes other writers' commits visible.
//!
//! ## Example
//!
//! ```no_run
//! use grove_db::{Database, Persistent};
//!
//! let db = Database::open("app.db")?;
//!
//! let root = Persistent::new();
//! root.set("name", "John")?;
//! db.elect(&root)?;
//! db.commit()?;
//!
//! assert_eq!(db.tx_count(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod error;
pub mod resolver;
mod snapshot;
mod txn;

pub use database::Database;
pub use error::{DbError, DbResult};
pub use resolver::{ConflictResolver, ResolveError, ResolverRegistry};

// The object and storage vocabulary users need alongside `Database`.
pub use grove_common::{Oid, Serial, TxId};
pub use grove_log::LogConfig;
pub use grove_object::{Blob, ObjectError, PRef, Persistent, StateMap, Status, Value};
