//! The commit protocol.
//!
//! Commit runs first-committer-wins MVCC:
//!
//! 1. acquire the commit lock (serialising writers across threads and
//!    processes) and catch up on transactions appended since this
//!    instance last looked;
//! 2. detect conflicts on the write set by comparing each object's
//!    serial against the serial observed at checkout; on a mismatch
//!    the kind's resolver (if registered) is invoked with the overlay
//!    base, the overlay, and the winning state, and a successful merge
//!    replaces the overlay and clears the conflict;
//! 3. encode the write set, pulling in detached objects reached
//!    through references and appending blob payloads;
//! 4. refuse the commit if a checked-out object stayed unreachable;
//! 5. write the trailer, fsync, release the lock, and publish the
//!    overlays as the new shared states.
//!
//! A failure in steps 2–3 still writes a *failure marker* (an empty
//! transaction whose txid advances) so external observers see the
//! attempt, then rolls the thread's overlays back to the freshly
//! observed shared states.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use grove_codec::{CodecError, CodecResult, SaveContext};
use grove_common::{Oid, Serial, TxId};
use grove_log::{BlobSlice, LogError, WriteHandle};
use grove_object::{Blob, PRef, Persistent, StateMap};

use crate::database::Database;
use crate::error::{DbError, DbResult};

/// One thread's uncommitted transaction against one database.
#[derive(Default)]
pub(crate) struct ThreadTx {
    /// Checked-out objects that belong to the database, in checkout
    /// order.
    registered: Vec<PRef>,
    registered_addrs: HashSet<usize>,
    /// Checked-out objects with no database yet; they must be reached
    /// from the root by commit time.
    unconnected: Vec<PRef>,
    unconnected_addrs: HashSet<usize>,
    /// Handle address → serial observed when the object was checked
    /// out (or re-based by a resolver).
    accessed: HashMap<usize, Serial>,
    /// Handle address → shared state the overlay was copied from;
    /// the `old` argument to conflict resolvers.
    bases: HashMap<usize, StateMap>,
}

impl ThreadTx {
    pub(crate) fn track_registered(&mut self, obj: &PRef, observed: Serial, base: StateMap) {
        let addr = Persistent::address(obj);
        if self.registered_addrs.insert(addr) {
            self.registered.push(Arc::clone(obj));
            self.accessed.insert(addr, observed);
            self.bases.insert(addr, base);
        }
    }

    pub(crate) fn track_unconnected(&mut self, obj: &PRef) {
        let addr = Persistent::address(obj);
        if self.unconnected_addrs.insert(addr) {
            self.unconnected.push(Arc::clone(obj));
        }
    }

    pub(crate) fn forget_unconnected(&mut self, obj: &PRef) {
        let addr = Persistent::address(obj);
        if self.unconnected_addrs.remove(&addr) {
            self.unconnected
                .retain(|o| Persistent::address(o) != addr);
        }
    }

    pub(crate) fn all_objects(&self) -> impl Iterator<Item = &PRef> {
        self.registered.iter().chain(self.unconnected.iter())
    }

    fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.unconnected.is_empty()
    }
}

/// Breadth-first encoding of the write set.
///
/// Starts from the registered objects and follows object references:
/// a reference to a detached object attaches it, allocates its OID and
/// queues it for writing, exactly like the original's pickling hook.
struct CommitWalk<'d, 'h> {
    db: &'d Database,
    handle: &'h mut WriteHandle<'d>,
    queue: VecDeque<PRef>,
    seen: HashSet<usize>,
    written: Vec<(PRef, StateMap)>,
    blobs: Vec<(Blob, BlobSlice)>,
    /// A storage failure inside a hook, kept apart so it is not
    /// reported as a serialization problem.
    storage_error: Option<LogError>,
}

impl<'d, 'h> CommitWalk<'d, 'h> {
    fn new(db: &'d Database, handle: &'h mut WriteHandle<'d>, seeds: &[PRef]) -> Self {
        Self {
            db,
            handle,
            queue: seeds.iter().cloned().collect(),
            seen: HashSet::new(),
            written: Vec::new(),
            blobs: Vec::new(),
            storage_error: None,
        }
    }

    fn run(&mut self) -> CodecResult<()> {
        while let Some(obj) = self.queue.pop_front() {
            let addr = Persistent::address(&obj);
            if !self.seen.insert(addr) {
                continue;
            }

            let oid = match obj.oid() {
                Some(oid) => oid,
                None => self.assign_oid(&obj)?,
            };

            let state = obj.visible_state();
            let db = self.db;
            let payload = db.codec.save(oid, &obj.kind(), &state, self)?;
            if let Err(err) = self.handle.stage_object(&payload) {
                let reason = err.to_string();
                self.storage_error = Some(err);
                return Err(CodecError::encode(reason));
            }
            self.written.push((obj, state));
        }
        Ok(())
    }

    fn assign_oid(&mut self, obj: &PRef) -> CodecResult<Oid> {
        let oid = self.handle.new_oid();
        self.db
            .registry
            .insert(oid, obj)
            .map_err(CodecError::reference_save)?;
        Ok(oid)
    }
}

impl SaveContext for CommitWalk<'_, '_> {
    fn object_ref(&mut self, obj: &PRef) -> CodecResult<Oid> {
        if let Some(oid) = obj.oid() {
            if obj.jar() != Some(self.db.registry.jar_id()) {
                return Err(CodecError::reference_save(
                    "object belongs to a different database",
                ));
            }
            return Ok(oid);
        }

        // First time this object is reached: it joins the database and
        // this transaction.
        let oid = self.assign_oid(obj)?;
        self.queue.push_back(Arc::clone(obj));
        Ok(oid)
    }

    fn blob_ref(&mut self, blob: &Blob) -> CodecResult<(u64, u64)> {
        let (mut source, length) = blob
            .take_source()
            .map_err(CodecError::reference_save)?;
        let slice = match self.handle.append_blob(source.as_mut(), length) {
            Ok(slice) => slice,
            Err(err) => {
                let reason = err.to_string();
                self.storage_error = Some(err);
                return Err(CodecError::reference_save(reason));
            }
        };
        self.blobs.push((blob.clone(), slice.clone()));
        Ok((slice.offset(), slice.length()))
    }
}

impl Database {
    /// Commits the calling thread's transaction.
    ///
    /// Returns the transaction id on success. On a conflict the
    /// transaction is rolled back (overlays dropped, a failure marker
    /// recorded in the log) and the error is returned; the thread may
    /// simply retry from fresh check-outs.
    ///
    /// A commit with nothing checked out is a no-op.
    pub fn commit(&self) -> DbResult<TxId> {
        let tid = thread::current().id();

        let (registered, unconnected) = {
            let threads = self.threads.lock();
            match threads.get(&tid) {
                Some(tx) if !tx.is_empty() => {
                    (tx.registered.clone(), tx.unconnected.clone())
                }
                _ => return Ok(self.log.last_txid()),
            }
        };

        // Conflicts already known before this commit (flagged by an
        // earlier begin) classify as read conflicts; fresh ones as
        // write conflicts.
        let pre_pending: HashSet<usize> = registered
            .iter()
            .filter(|obj| obj.has_pending_conflict())
            .map(Persistent::address)
            .collect();

        // The engine lock orders this commit against concurrent
        // begin() applications in this instance; it is always taken
        // before the log locks.
        let _engine = self.engine.lock();

        let (mut handle, records) = self.log.begin_write()?;

        if let Err(err) = self.apply_records(&records) {
            let _ = handle.abort();
            return Err(err);
        }

        if let Some(err) = self.resolve_or_fail(tid, &registered, &pre_pending) {
            let marker = handle.abort_with_marker();
            self.rollback(tid, &registered, &unconnected);
            match marker {
                Ok(txid) => {
                    tracing::warn!(txid = txid.as_u64(), error = %err, "commit failed")
                }
                Err(marker_err) => {
                    tracing::warn!(error = %marker_err, "failure marker could not be recorded")
                }
            }
            return Err(err);
        }

        // Encode the write set; references pull in detached objects.
        let mut walk = CommitWalk::new(self, &mut handle, &registered);
        let outcome = walk.run();
        let storage_error = walk.storage_error.take();
        let CommitWalk { written, blobs, .. } = walk;

        if let Err(codec_err) = outcome {
            let _ = handle.abort_with_marker();
            self.rollback(tid, &registered, &unconnected);
            return Err(match storage_error {
                Some(err) => DbError::from(err),
                None => DbError::from(codec_err),
            });
        }

        // Every checked-out detached object must have been reached.
        for obj in &unconnected {
            if obj.jar().is_none() {
                let _ = handle.abort();
                return Err(DbError::object_graph(
                    "checked-out object is not reachable from the root",
                ));
            }
        }

        let txid = handle.commit()?;
        let serial = Serial::from(txid);

        // Durable: flip blobs to their stored identity, then publish
        // the overlays as the new shared states.
        for (blob, slice) in blobs {
            blob.mark_stored(slice);
        }
        for (obj, state) in written {
            obj.publish(state, serial);
        }

        self.threads.lock().remove(&tid);
        tracing::debug!(txid = txid.as_u64(), "transaction committed");
        Ok(txid)
    }

    /// First-committer-wins check: an object whose serial moved past
    /// the serial observed at checkout was committed under us. The
    /// kind's resolver, if registered, gets one chance per object to
    /// merge `(old, saved, new)`; anything it cannot repair fails the
    /// commit.
    fn resolve_or_fail(
        &self,
        tid: ThreadId,
        registered: &[PRef],
        pre_pending: &HashSet<usize>,
    ) -> Option<DbError> {
        let mut threads = self.threads.lock();
        let tx = threads.get_mut(&tid)?;

        for obj in registered {
            let addr = Persistent::address(obj);
            let observed = tx.accessed.get(&addr).copied().unwrap_or(Serial::NONE);
            let current = obj.serial();
            if current == observed {
                continue;
            }

            let oid = obj.oid().unwrap_or(Oid::INVALID);
            let conflict_err = if pre_pending.contains(&addr) {
                DbError::ReadConflict { oid }
            } else {
                DbError::WriteConflict { oid }
            };

            let Some(resolver) = self.resolvers.get(&obj.kind()) else {
                return Some(conflict_err);
            };
            let Some(saved) = obj.overlay_state(tid) else {
                return Some(conflict_err);
            };
            let old = tx.bases.get(&addr).cloned().unwrap_or_default();
            let new = obj.shared_state();

            match resolver.resolve(&old, &saved, &new) {
                Ok(merged) => {
                    tracing::debug!(oid = oid.as_u64(), "conflict resolved");
                    obj.replace_overlay(tid, merged);
                    tx.accessed.insert(addr, current);
                    tx.bases.insert(addr, new);
                }
                Err(err) => {
                    tracing::debug!(
                        oid = oid.as_u64(),
                        error = %err,
                        "conflict resolution failed"
                    );
                    return Some(conflict_err);
                }
            }
        }
        None
    }

    /// Rolls the thread's transaction back to the freshly observed
    /// shared states.
    fn rollback(&self, tid: ThreadId, registered: &[PRef], unconnected: &[PRef]) {
        for obj in registered.iter().chain(unconnected.iter()) {
            obj.release_overlay();
        }
        self.threads.lock().remove(&tid);
    }
}
