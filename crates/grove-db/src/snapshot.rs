//! Snapshot emission.
//!
//! A snapshot collapses every committed transaction into a single
//! transaction in a target database: the object graph is walked
//! breadth-first from the root, every object gets a fresh OID in the
//! target's registry, and blob payloads are re-copied byte for byte.

use std::collections::{HashMap, VecDeque};
use std::thread;

use grove_object::{Blob, PRef, Persistent, StateMap, Value};

use crate::database::Database;
use crate::error::{DbError, DbResult};

impl Database {
    /// Writes a collapsed, single-transaction copy of this database's
    /// current graph into `target`, which must be freshly created and
    /// empty.
    ///
    /// Afterwards `target.tx_count() == 1` and the target graph is
    /// structurally isomorphic to this database's current view.
    pub fn snapshot(&self, target: &Database) -> DbResult<()> {
        if target.tx_count() != 0 || !target.registry.is_empty() {
            return Err(DbError::SnapshotTargetNotEmpty);
        }
        let Some(src_root) = self.registry.root() else {
            // Nothing to collapse.
            return Ok(());
        };

        let tid = thread::current().id();
        let mut counterparts: HashMap<usize, PRef> = HashMap::new();
        let mut queue: VecDeque<PRef> = VecDeque::new();

        let dst_root = Persistent::with_kind(&src_root.kind());
        counterparts.insert(Persistent::address(&src_root), dst_root.clone());
        queue.push_back(src_root);

        while let Some(src) = queue.pop_front() {
            let dst = counterparts[&Persistent::address(&src)].clone();
            let state = src.visible_state();
            let translated =
                self.translate_state(&state, &mut counterparts, &mut queue)?;
            // Counterpart objects are born local to this thread, so
            // the translated state lands in their overlay and commits
            // with the target transaction.
            dst.replace_overlay(tid, translated);
        }

        let count = counterparts.len();
        target.elect(&dst_root)?;
        target.commit()?;
        tracing::debug!(objects = count, "snapshot written");
        Ok(())
    }

    fn translate_state(
        &self,
        state: &StateMap,
        counterparts: &mut HashMap<usize, PRef>,
        queue: &mut VecDeque<PRef>,
    ) -> DbResult<StateMap> {
        let mut out = StateMap::new();
        for (key, value) in state {
            out.insert(key.clone(), self.translate_value(value, counterparts, queue)?);
        }
        Ok(out)
    }

    fn translate_value(
        &self,
        value: &Value,
        counterparts: &mut HashMap<usize, PRef>,
        queue: &mut VecDeque<PRef>,
    ) -> DbResult<Value> {
        Ok(match value {
            Value::Object(src) => {
                let addr = Persistent::address(src);
                let dst = match counterparts.get(&addr) {
                    Some(dst) => dst.clone(),
                    None => {
                        let dst = Persistent::with_kind(&src.kind());
                        counterparts.insert(addr, dst.clone());
                        queue.push_back(src.clone());
                        dst
                    }
                };
                Value::Object(dst)
            }
            Value::Blob(blob) => {
                // Byte-for-byte copy, streamed from the source log at
                // target commit time.
                let slice = blob.slice().ok_or(DbError::SnapshotPendingBlob)?;
                let stream = slice.open().map_err(DbError::from)?;
                Value::Blob(Blob::from_reader(stream, slice.length()))
            }
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.translate_value(item, counterparts, queue)?);
                }
                Value::List(out)
            }
            Value::Map(map) => {
                let mut out = std::collections::BTreeMap::new();
                for (key, item) in map {
                    out.insert(
                        key.clone(),
                        self.translate_value(item, counterparts, queue)?,
                    );
                }
                Value::Map(out)
            }
            plain => plain.clone(),
        })
    }
}
