//! Process-wide object registry.
//!
//! The registry is the unique OID → live object mapping for one
//! database instance. It owns the live objects (references between
//! persistent objects carry no ownership), which is what breaks
//! reference cycles in the object graph. Entries are never removed
//! for the lifetime of the instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use grove_common::Oid;
use parking_lot::Mutex;

use crate::error::{ObjectError, ObjectResult};
use crate::handle::{PRef, Persistent};

static NEXT_JAR_ID: AtomicU64 = AtomicU64::new(1);

/// OID → object mapping for one database instance.
pub struct Registry {
    jar_id: u64,
    objects: Mutex<HashMap<Oid, PRef>>,
}

impl Registry {
    /// Creates an empty registry with a fresh instance id.
    pub fn new() -> Self {
        Self {
            jar_id: NEXT_JAR_ID.fetch_add(1, Ordering::Relaxed),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// The owning database's instance id.
    pub fn jar_id(&self) -> u64 {
        self.jar_id
    }

    /// Number of live persistent objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns true if no objects are registered.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Looks up an object by OID.
    pub fn get(&self, oid: Oid) -> Option<PRef> {
        self.objects.lock().get(&oid).cloned()
    }

    /// The root object, if one has been persisted or elected.
    pub fn root(&self) -> Option<PRef> {
        self.get(Oid::ROOT)
    }

    /// Looks up an object, creating a ghost on a miss.
    ///
    /// The ghost is attached to this registry and will receive its
    /// state when the transaction that wrote it is applied.
    pub fn get_or_ghost(&self, oid: Oid, kind: &str) -> PRef {
        let mut objects = self.objects.lock();
        if let Some(obj) = objects.get(&oid) {
            return obj.clone();
        }

        let ghost = Persistent::ghost(oid, kind);
        // A freshly created ghost cannot belong to anyone else.
        ghost
            .attach(self.jar_id)
            .expect("fresh ghost cannot be attached elsewhere");
        objects.insert(oid, ghost.clone());
        ghost
    }

    /// Registers an object under an OID, claiming it for this
    /// database.
    ///
    /// Fails if the object belongs to another database or a different
    /// object already holds the OID.
    pub fn insert(&self, oid: Oid, obj: &PRef) -> ObjectResult<()> {
        obj.attach(self.jar_id)?;

        let mut objects = self.objects.lock();
        if let Some(existing) = objects.get(&oid) {
            if !std::sync::Arc::ptr_eq(existing, obj) {
                return Err(ObjectError::OidTaken { oid });
            }
            return Ok(());
        }

        obj.set_oid(oid);
        objects.insert(oid, obj.clone());
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("jar_id", &self.jar_id)
            .field("len", &self.len())
            .finish()
    }
}
