//! Persistent object handles.
//!
//! A [`Persistent`] is a shared handle ([`PRef`]) around an attribute
//! map. All reads go through the thread's overlay when one exists and
//! the published shared state otherwise; all writes require the
//! calling thread to own an overlay, produced by
//! [`checkout`](Persistent::checkout).
//!
//! The shared state is never mutated in place: publication and
//! catch-up replace it wholesale, so concurrent readers work lock-free
//! against a map that cannot change under them (the core `RwLock` is
//! held only long enough to swap or clone the map).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use grove_common::{Oid, Serial};
use parking_lot::{Mutex, RwLock};

use crate::error::{ObjectError, ObjectResult};
use crate::value::{StateMap, Value};

/// Shared handle to a persistent object.
///
/// The handle address is the object's in-process identity; it never
/// changes across commits, aborts and check-outs.
pub type PRef = Arc<Persistent>;

/// Per-object lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Known by OID only; state not yet loaded.
    Ghost,
    /// Published state visible to all threads; writes rejected.
    Shared,
    /// At least one thread holds a writable overlay.
    Local,
    /// Committed, but threads checked out before the commit still hold
    /// their overlays.
    Sticky,
}

impl Status {
    /// Returns true for the ghost state.
    pub fn is_ghost(&self) -> bool {
        *self == Status::Ghost
    }

    /// Returns true for the shared state.
    pub fn is_shared(&self) -> bool {
        *self == Status::Shared
    }

    /// Returns true for the local state.
    pub fn is_local(&self) -> bool {
        *self == Status::Local
    }

    /// Returns true for the sticky state.
    pub fn is_sticky(&self) -> bool {
        *self == Status::Sticky
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ghost => write!(f, "ghost"),
            Status::Shared => write!(f, "shared"),
            Status::Local => write!(f, "local"),
            Status::Sticky => write!(f, "sticky"),
        }
    }
}

struct Core {
    status: Status,
    shared: StateMap,
    overlays: HashMap<ThreadId, StateMap>,
    checkout_count: usize,
    /// Threads whose overlays were invalidated by a concurrent commit
    /// and not repaired by a resolver.
    pending_conflict: HashSet<ThreadId>,
}

/// A persistent object: a dynamic attribute map with shared/local
/// overlay semantics.
pub struct Persistent {
    kind: Mutex<String>,
    oid: Mutex<Option<Oid>>,
    serial: AtomicU64,
    jar: Mutex<Option<u64>>,
    core: RwLock<Core>,
}

impl Persistent {
    /// Creates a detached object of the default kind, checked out by
    /// the creating thread.
    pub fn new() -> PRef {
        Self::with_kind("object")
    }

    /// Creates a detached object tagged with `kind`.
    ///
    /// The kind selects the conflict resolver, if one is registered
    /// for it, and is stored in every serialized version.
    pub fn with_kind(kind: &str) -> PRef {
        let mut overlays = HashMap::new();
        overlays.insert(thread::current().id(), StateMap::new());

        Arc::new(Self {
            kind: Mutex::new(kind.to_string()),
            oid: Mutex::new(None),
            serial: AtomicU64::new(Serial::NONE.as_u64()),
            jar: Mutex::new(None),
            core: RwLock::new(Core {
                status: Status::Local,
                shared: StateMap::new(),
                overlays,
                checkout_count: 1,
                pending_conflict: HashSet::new(),
            }),
        })
    }

    /// Creates a ghost for an OID seen in the log but not yet loaded.
    pub(crate) fn ghost(oid: Oid, kind: &str) -> PRef {
        Arc::new(Self {
            kind: Mutex::new(kind.to_string()),
            oid: Mutex::new(Some(oid)),
            serial: AtomicU64::new(Serial::NONE.as_u64()),
            jar: Mutex::new(None),
            core: RwLock::new(Core {
                status: Status::Ghost,
                shared: StateMap::new(),
                overlays: HashMap::new(),
                checkout_count: 0,
                pending_conflict: HashSet::new(),
            }),
        })
    }

    /// In-process identity of a handle.
    pub fn address(this: &PRef) -> usize {
        Arc::as_ptr(this) as usize
    }

    /// The object's kind tag.
    pub fn kind(&self) -> String {
        self.kind.lock().clone()
    }

    /// Updates the kind tag. Used when a ghost created from a bare OID
    /// reference learns its real kind from its committed record.
    pub fn set_kind(&self, kind: &str) {
        let mut slot = self.kind.lock();
        if *slot != kind {
            *slot = kind.to_string();
        }
    }

    /// The object's OID, if it has been persisted.
    pub fn oid(&self) -> Option<Oid> {
        *self.oid.lock()
    }

    /// Assigns the OID. Engine use; an OID is only ever assigned once.
    pub fn set_oid(&self, oid: Oid) {
        let mut slot = self.oid.lock();
        debug_assert!(slot.is_none() || *slot == Some(oid));
        *slot = Some(oid);
    }

    /// The object's current version.
    pub fn serial(&self) -> Serial {
        Serial::new(self.serial.load(Ordering::Acquire))
    }

    fn set_serial(&self, serial: Serial) {
        self.serial.store(serial.as_u64(), Ordering::Release);
    }

    /// The owning database's instance id, if attached.
    pub fn jar(&self) -> Option<u64> {
        *self.jar.lock()
    }

    /// Claims the object for a database. Exactly one database may ever
    /// own an object; a second claim is rejected.
    pub fn attach(&self, jar_id: u64) -> ObjectResult<()> {
        let mut jar = self.jar.lock();
        match *jar {
            None => {
                *jar = Some(jar_id);
                Ok(())
            }
            Some(current) if current == jar_id => Ok(()),
            Some(_) => Err(ObjectError::AlreadyAttached),
        }
    }

    /// The object's lifecycle state.
    pub fn status(&self) -> Status {
        self.core.read().status
    }

    /// Number of threads currently holding an overlay.
    pub fn checkout_count(&self) -> usize {
        self.core.read().checkout_count
    }

    /// Gives the calling thread a writable overlay.
    ///
    /// Checking out an object the thread already holds is a no-op.
    /// Returns true if a new overlay was created.
    pub fn checkout(&self) -> bool {
        let tid = thread::current().id();
        let mut core = self.core.write();

        if core.overlays.contains_key(&tid) {
            return false;
        }

        let copy = core.shared.clone();
        core.overlays.insert(tid, copy);
        core.checkout_count += 1;
        core.status = Status::Local;
        true
    }

    /// Returns true if the calling thread holds an overlay.
    pub fn is_checked_out(&self) -> bool {
        let tid = thread::current().id();
        self.core.read().overlays.contains_key(&tid)
    }

    /// Reads an attribute: the thread's overlay when one exists, the
    /// shared state otherwise.
    ///
    /// Reading a ghost fails with
    /// [`UnresolvedGhost`](ObjectError::UnresolvedGhost): the object
    /// is known only by OID and has no loaded state, so a dangling
    /// reference is distinguishable from an attribute that is merely
    /// absent.
    pub fn get(&self, name: &str) -> ObjectResult<Option<Value>> {
        let tid = thread::current().id();
        let core = self.core.read();
        match core.overlays.get(&tid) {
            Some(overlay) => Ok(overlay.get(name).cloned()),
            None if core.status.is_ghost() => {
                drop(core);
                Err(ObjectError::UnresolvedGhost {
                    oid: self.oid().unwrap_or(Oid::INVALID),
                })
            }
            None => Ok(core.shared.get(name).cloned()),
        }
    }

    /// Writes an attribute into the calling thread's overlay.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> ObjectResult<()> {
        let tid = thread::current().id();
        let mut core = self.core.write();
        match core.overlays.get_mut(&tid) {
            Some(overlay) => {
                overlay.insert(name.into(), value.into());
                Ok(())
            }
            None => Err(ObjectError::ReadOnly),
        }
    }

    /// Removes an attribute from the calling thread's overlay.
    ///
    /// Removing an absent attribute is not an error.
    pub fn remove(&self, name: &str) -> ObjectResult<()> {
        let tid = thread::current().id();
        let mut core = self.core.write();
        match core.overlays.get_mut(&tid) {
            Some(overlay) => {
                overlay.remove(name);
                Ok(())
            }
            None => Err(ObjectError::ReadOnly),
        }
    }

    /// The state this thread sees: its overlay if checked out, the
    /// shared state otherwise.
    pub fn visible_state(&self) -> StateMap {
        let tid = thread::current().id();
        let core = self.core.read();
        match core.overlays.get(&tid) {
            Some(overlay) => overlay.clone(),
            None => core.shared.clone(),
        }
    }

    /// A copy of the published shared state.
    pub fn shared_state(&self) -> StateMap {
        self.core.read().shared.clone()
    }

    /// Threads currently holding overlays.
    pub fn overlay_threads(&self) -> Vec<ThreadId> {
        self.core.read().overlays.keys().copied().collect()
    }

    /// A copy of a specific thread's overlay.
    pub fn overlay_state(&self, tid: ThreadId) -> Option<StateMap> {
        self.core.read().overlays.get(&tid).cloned()
    }

    /// Replaces a thread's overlay with a resolver-merged state.
    pub fn replace_overlay(&self, tid: ThreadId, merged: StateMap) {
        let mut core = self.core.write();
        if core.overlays.contains_key(&tid) {
            core.overlays.insert(tid, merged);
        }
    }

    /// True if a concurrent commit invalidated the calling thread's
    /// overlay without a successful resolution.
    pub fn has_pending_conflict(&self) -> bool {
        let tid = thread::current().id();
        self.core.read().pending_conflict.contains(&tid)
    }

    /// Publishes the calling thread's overlay as the new shared state.
    ///
    /// Called after the commit is durable: the overlay becomes the
    /// shared state, the thread's checkout ends, and the object lands
    /// in `Shared` (no other holders) or `Sticky` (still-checked-out
    /// threads keep their overlays until they commit or abort).
    pub fn publish(&self, new_shared: StateMap, serial: Serial) {
        let tid = thread::current().id();
        let mut core = self.core.write();

        core.shared = new_shared;
        if core.overlays.remove(&tid).is_some() {
            core.checkout_count -= 1;
        }
        core.pending_conflict.remove(&tid);
        core.status = if core.checkout_count == 0 {
            Status::Shared
        } else {
            Status::Sticky
        };
        drop(core);

        self.set_serial(serial);
    }

    /// Drops the calling thread's overlay (abort or conflict
    /// rollback). The object retracts to `Shared` when the last
    /// overlay goes away.
    ///
    /// Returns true if an overlay was released.
    pub fn release_overlay(&self) -> bool {
        let tid = thread::current().id();
        let mut core = self.core.write();

        let released = core.overlays.remove(&tid).is_some();
        if released {
            core.checkout_count -= 1;
        }
        core.pending_conflict.remove(&tid);
        if core.checkout_count == 0 && !core.status.is_ghost() {
            core.status = Status::Shared;
        }
        released
    }

    /// Installs a state that arrived from the log (catch-up).
    ///
    /// The shared state is replaced unconditionally; threads listed in
    /// `unresolved` are marked conflict-pending and will fail their
    /// next commit unless they abort first.
    pub fn apply_committed(&self, new_shared: StateMap, serial: Serial, unresolved: &[ThreadId]) {
        let mut core = self.core.write();

        core.shared = new_shared;
        core.pending_conflict.extend(unresolved.iter().copied());
        if core.overlays.is_empty() {
            core.status = Status::Shared;
        }
        drop(core);

        self.set_serial(serial);
    }
}

impl fmt::Debug for Persistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.read();
        f.debug_struct("Persistent")
            .field("kind", &*self.kind.lock())
            .field("oid", &*self.oid.lock())
            .field("serial", &self.serial())
            .field("status", &core.status)
            .field("checkout_count", &core.checkout_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_born_local_and_writable() {
        let obj = Persistent::new();
        assert!(obj.status().is_local());
        assert!(obj.is_checked_out());
        assert_eq!(obj.checkout_count(), 1);

        obj.set("name", "John").unwrap();
        assert_eq!(obj.get("name").unwrap(), Some(Value::from("John")));
    }

    #[test]
    fn test_shared_rejects_writes() {
        let obj = Persistent::new();
        obj.set("name", "John").unwrap();
        obj.publish(obj.visible_state(), Serial::new(1));

        assert!(obj.status().is_shared());
        assert!(matches!(obj.set("name", "Jane"), Err(ObjectError::ReadOnly)));
        // Reads still work against the published state.
        assert_eq!(obj.get("name").unwrap(), Some(Value::from("John")));
    }

    #[test]
    fn test_checkout_roundtrip() {
        let obj = Persistent::new();
        obj.set("n", 1i64).unwrap();
        obj.publish(obj.visible_state(), Serial::new(1));

        assert!(obj.checkout());
        assert!(!obj.checkout()); // idempotent per thread
        assert!(obj.status().is_local());

        obj.set("n", 2i64).unwrap();
        assert_eq!(obj.get("n").unwrap(), Some(Value::Int(2)));

        assert!(obj.release_overlay());
        assert!(obj.status().is_shared());
        assert_eq!(obj.get("n").unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_remove_does_not_resurrect() {
        let obj = Persistent::new();
        obj.set("gone", 1i64).unwrap();
        obj.publish(obj.visible_state(), Serial::new(1));

        obj.checkout();
        obj.remove("gone").unwrap();
        assert_eq!(obj.get("gone").unwrap(), None);

        obj.publish(obj.visible_state(), Serial::new(2));
        assert_eq!(obj.get("gone").unwrap(), None);
    }

    #[test]
    fn test_overlay_isolation_across_threads() {
        let obj = Persistent::new();
        obj.set("name", "base").unwrap();
        obj.publish(obj.visible_state(), Serial::new(1));

        obj.checkout();
        obj.set("name", "mine").unwrap();

        let other = Arc::clone(&obj);
        std::thread::spawn(move || {
            // The other thread holds no overlay and must see the
            // published state, not this thread's overlay.
            assert_eq!(other.get("name").unwrap(), Some(Value::from("base")));
            assert!(matches!(other.set("name", "x"), Err(ObjectError::ReadOnly)));

            // After its own checkout it writes independently.
            other.checkout();
            other.set("name", "theirs").unwrap();
            assert_eq!(other.get("name").unwrap(), Some(Value::from("theirs")));
            other.release_overlay();
        })
        .join()
        .unwrap();

        assert_eq!(obj.get("name").unwrap(), Some(Value::from("mine")));
    }

    #[test]
    fn test_sticky_until_last_holder_releases() {
        use std::sync::mpsc;

        let obj = Persistent::new();
        obj.set("v", 0i64).unwrap();
        obj.publish(obj.visible_state(), Serial::new(1));

        obj.checkout();
        obj.set("v", 1i64).unwrap();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let other = Arc::clone(&obj);
        let holder = std::thread::spawn(move || {
            other.checkout();
            ready_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            other.release_overlay();
        });

        ready_rx.recv().unwrap();
        assert_eq!(obj.checkout_count(), 2);

        // This thread commits; the other thread's overlay keeps the
        // object sticky.
        obj.publish(obj.visible_state(), Serial::new(2));
        assert!(obj.status().is_sticky());
        assert_eq!(obj.get("v").unwrap(), Some(Value::Int(1)));

        // The last holder releasing retracts the object to shared.
        go_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(obj.status().is_shared());
        assert_eq!(obj.checkout_count(), 0);
    }

    #[test]
    fn test_pending_conflict_marks() {
        let obj = Persistent::new();
        obj.set("v", 0i64).unwrap();
        obj.publish(obj.visible_state(), Serial::new(1));

        obj.checkout();
        obj.set("v", 1i64).unwrap();

        let tid = std::thread::current().id();
        let mut incoming = StateMap::new();
        incoming.insert("v".into(), Value::Int(9));
        obj.apply_committed(incoming, Serial::new(2), &[tid]);

        assert!(obj.has_pending_conflict());
        // The overlay still shows this thread's value; the shared
        // state advanced underneath.
        assert_eq!(obj.get("v").unwrap(), Some(Value::Int(1)));
        assert_eq!(obj.shared_state().get("v"), Some(&Value::Int(9)));
        assert_eq!(obj.serial(), Serial::new(2));

        obj.release_overlay();
        assert!(!obj.has_pending_conflict());
        assert_eq!(obj.get("v").unwrap(), Some(Value::Int(9)));
    }

    #[test]
    fn test_ghost_reads_are_unresolved() {
        let ghost = Persistent::ghost(Oid::new(7), "object");
        assert!(ghost.status().is_ghost());
        assert!(matches!(
            ghost.get("anything"),
            Err(ObjectError::UnresolvedGhost { oid }) if oid == Oid::new(7)
        ));

        // Once a state arrives, a missing attribute is a plain miss.
        ghost.apply_committed(StateMap::new(), Serial::new(1), &[]);
        assert!(ghost.status().is_shared());
        assert_eq!(ghost.get("anything").unwrap(), None);
    }

    #[test]
    fn test_attach_once() {
        let obj = Persistent::new();
        obj.attach(1).unwrap();
        obj.attach(1).unwrap();
        assert!(matches!(obj.attach(2), Err(ObjectError::AlreadyAttached)));
        assert_eq!(obj.jar(), Some(1));
    }

    #[test]
    fn test_identity_is_stable() {
        let obj = Persistent::new();
        let addr = Persistent::address(&obj);
        obj.set("x", 1i64).unwrap();
        obj.publish(obj.visible_state(), Serial::new(1));
        obj.checkout();
        obj.release_overlay();
        assert_eq!(Persistent::address(&obj), addr);
    }
}
