//! # grove-object
//!
//! Persistent object state machine and registry for Grove.
//!
//! A persistent object is a handle around a dynamic attribute map.
//! The map visible to all threads (the *shared* state) is immutable
//! once published; a thread that wants to write checks the object out,
//! which gives it a private *overlay* copy. Overlays are merged back
//! into a new shared state when the owning transaction commits, or
//! discarded on abort.
//!
//! Per-object states:
//!
//! ```text
//! ┌───────┐  load   ┌────────┐  checkout  ┌───────┐
//! │ Ghost │────────▶│ Shared │───────────▶│ Local │
//! └───────┘         └────────┘            └───────┘
//!                        ▲                    │ commit
//!                        │  last overlay      ▼
//!                        │  released     ┌────────┐
//!                        └───────────────│ Sticky │
//!                                        └────────┘
//! ```
//!
//! Object identity never changes: the handle address is stable for the
//! process lifetime, and the registry keeps every handle alive.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod error;
pub mod handle;
pub mod registry;
pub mod value;

pub use blob::Blob;
pub use error::{ObjectError, ObjectResult};
pub use handle::{PRef, Persistent, Status};
pub use registry::Registry;
pub use value::{StateMap, Value};
