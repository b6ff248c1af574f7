//! The database: object registry, transaction log, and per-thread
//! transaction state behind one handle.

use std::collections::HashMap;
use std::path::Path;
use std::thread::{self, ThreadId};

use grove_codec::{BincodeCodec, CodecError, CodecResult, LoadContext, ObjectCodec};
use grove_common::{Oid, Serial};
use grove_log::{LogConfig, TransactionLog, TxRecord};
use grove_object::{Blob, ObjectError, PRef, Registry};
use parking_lot::Mutex;

use crate::error::{DbError, DbResult};
use crate::resolver::ResolverRegistry;
use crate::txn::ThreadTx;

/// Kind tag used for ghosts created from bare OID references; the
/// real kind arrives with the object's committed record.
pub(crate) const DEFAULT_KIND: &str = "object";

/// An embeddable transactional object-graph database.
///
/// One `Database` value is one *instance*: it has its own registry and
/// its own view of the log. Several instances (in one process or in
/// many) may share the same file; each sees the others' commits after
/// calling [`begin`](Database::begin).
///
/// ```no_run
/// use grove_db::{Database, Persistent};
///
/// let db = Database::open("app.db")?;
/// let root = Persistent::new();
/// root.set("name", "John")?;
/// db.elect(&root)?;
/// db.commit()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Database {
    pub(crate) log: TransactionLog,
    pub(crate) registry: Registry,
    pub(crate) codec: Box<dyn ObjectCodec>,
    pub(crate) resolvers: ResolverRegistry,
    pub(crate) threads: Mutex<HashMap<ThreadId, ThreadTx>>,
    /// Serialises catch-up application against commits within this
    /// instance. Always taken before any log lock.
    pub(crate) engine: Mutex<()>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and replays
    /// the log into memory.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::open_with(path, LogConfig::default())
    }

    /// Opens with an explicit log configuration.
    pub fn open_with(path: impl AsRef<Path>, config: LogConfig) -> DbResult<Self> {
        let log = TransactionLog::open(path.as_ref(), config)?;
        let db = Self {
            log,
            registry: Registry::new(),
            codec: Box::new(BincodeCodec::new()),
            resolvers: ResolverRegistry::new(),
            threads: Mutex::new(HashMap::new()),
            engine: Mutex::new(()),
        };

        // Eager load: every committed object materialises now; paging
        // afterwards is the OS's business.
        db.begin()?;
        tracing::debug!(
            path = %path.as_ref().display(),
            objects = db.len(),
            transactions = db.tx_count(),
            "database opened"
        );
        Ok(db)
    }

    /// The current root object, if any.
    pub fn root(&self) -> Option<PRef> {
        self.registry.root()
    }

    /// Installs `obj` as the database root. Allowed at most once, and
    /// only for an object that has never been persisted.
    pub fn elect(&self, obj: &PRef) -> DbResult<()> {
        if obj.oid().is_some() {
            return Err(DbError::ElectPersisted);
        }
        if self.registry.root().is_some() {
            return Err(DbError::RootExists);
        }

        self.registry.insert(Oid::ROOT, obj).map_err(|e| match e {
            ObjectError::AlreadyAttached => DbError::ForeignObject,
            other => DbError::from(other),
        })?;

        // The root joins the calling thread's write set.
        let tid = thread::current().id();
        let mut threads = self.threads.lock();
        let tx = threads.entry(tid).or_default();
        tx.forget_unconnected(obj);
        tx.track_registered(obj, obj.serial(), obj.shared_state());
        Ok(())
    }

    /// Number of live persistent objects in the graph.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns true if no objects have been persisted or elected.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Number of recorded transactions this instance has observed,
    /// including failure markers.
    pub fn tx_count(&self) -> u64 {
        self.log.tx_count()
    }

    /// The per-kind conflict resolver table.
    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    /// Gives the calling thread a writable overlay on `obj` and
    /// registers it with the thread's transaction.
    ///
    /// Checking out an object the thread already holds is a no-op.
    pub fn checkout(&self, obj: &PRef) -> DbResult<()> {
        match obj.jar() {
            Some(jar) if jar != self.registry.jar_id() => return Err(DbError::ForeignObject),
            _ => {}
        }

        // Record serial and base state before taking the overlay: if a
        // concurrent catch-up slips between the two, the commit sees a
        // stale serial and fails safe instead of losing the update.
        let observed = obj.serial();
        let base = obj.shared_state();
        obj.checkout();

        let tid = thread::current().id();
        let mut threads = self.threads.lock();
        let tx = threads.entry(tid).or_default();
        if obj.jar().is_some() {
            tx.track_registered(obj, observed, base);
        } else {
            tx.track_unconnected(obj);
        }
        Ok(())
    }

    /// Catches up on transactions appended by other writers, making
    /// them visible to this instance.
    pub fn begin(&self) -> DbResult<()> {
        let _engine = self.engine.lock();
        let records = self.log.catch_up()?;
        self.apply_records(&records)
    }

    /// Discards the calling thread's transaction: every checked-out
    /// object drops its overlay and retracts to the shared state.
    pub fn abort(&self) {
        let tid = thread::current().id();
        let tx = self.threads.lock().remove(&tid);
        if let Some(tx) = tx {
            for obj in tx.all_objects() {
                obj.release_overlay();
            }
            tracing::debug!("transaction aborted");
        }
    }

    /// Replays committed transactions into the in-memory graph.
    ///
    /// Shared states are replaced unconditionally. Threads holding an
    /// overlay on an updated object are marked conflict-pending: their
    /// commit will fail with a read conflict unless the kind's
    /// resolver repairs the overlap at commit time.
    ///
    /// Callers must hold the engine lock.
    pub(crate) fn apply_records(&self, records: &[TxRecord]) -> DbResult<()> {
        for tx in records {
            if tx.is_failure_marker() {
                continue;
            }
            let serial = Serial::from(tx.txid);

            for payload in &tx.objects {
                let loader = RegistryLoader { db: self };
                let version = self.codec.load(payload, &loader)?;
                self.log.observe_oid(version.oid);

                let obj = self.registry.get_or_ghost(version.oid, &version.kind);
                obj.set_kind(&version.kind);

                let holders = obj.overlay_threads();
                if !holders.is_empty() {
                    tracing::debug!(
                        oid = version.oid.as_u64(),
                        threads = holders.len(),
                        "concurrent commit invalidated checked-out overlays"
                    );
                }
                obj.apply_committed(version.state, serial, &holders);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("objects", &self.len())
            .field("tx_count", &self.tx_count())
            .finish()
    }
}

/// Resolves references during catch-up loads: OIDs through the
/// registry (ghosting unknown ones), blob stubs through the log.
struct RegistryLoader<'a> {
    db: &'a Database,
}

impl LoadContext for RegistryLoader<'_> {
    fn object_ref(&self, oid: Oid) -> CodecResult<PRef> {
        Ok(self.db.registry.get_or_ghost(oid, DEFAULT_KIND))
    }

    fn blob_ref(&self, offset: u64, length: u64) -> CodecResult<Blob> {
        let slice = self
            .db
            .log
            .read_blob(offset, length)
            .map_err(CodecError::reference_load)?;
        Ok(Blob::from_slice(slice))
    }
}

