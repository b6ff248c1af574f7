//! End-to-end scenarios exercising the full engine: birth and commit,
//! cross-instance visibility, write conflicts, resolver merging,
//! graph-reachability enforcement, and blob round-trips.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use grove_codec::{BincodeCodec, CodecResult, ObjectCodec, SaveContext};
use grove_db::{
    Blob, ConflictResolver, Database, DbError, ObjectError, Oid, PRef, Persistent, ResolveError,
    StateMap, Value,
};
use grove_log::{LogConfig, TransactionLog};
use tempfile::TempDir;

fn count_of(state: &StateMap) -> i64 {
    state.get("count").and_then(|v| v.as_int()).unwrap_or(0)
}

/// Sums concurrent increments instead of failing them.
struct CounterResolver;

impl ConflictResolver for CounterResolver {
    fn resolve(
        &self,
        old: &StateMap,
        saved: &StateMap,
        new: &StateMap,
    ) -> Result<StateMap, ResolveError> {
        let mut merged = new.clone();
        let total = count_of(new) + (count_of(saved) - count_of(old));
        merged.insert("count".to_string(), Value::Int(total));
        Ok(merged)
    }
}

#[test]
fn birth_then_commit() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("data.db")).unwrap();
    assert!(db.root().is_none());
    assert!(db.is_empty());

    let obj = Persistent::new();
    obj.set("name", "John").unwrap();
    db.elect(&obj).unwrap();
    db.commit().unwrap();

    assert_eq!(db.len(), 1);
    assert_eq!(obj.oid(), Some(Oid::new(0)));
    assert_eq!(db.tx_count(), 1);
    assert_eq!(obj.get("name").unwrap(), Some(Value::from("John")));
}

#[test]
fn cross_instance_visibility() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data.db");

    let a = Database::open(&path).unwrap();
    let root_a = Persistent::new();
    root_a.set("name", "James").unwrap();
    a.elect(&root_a).unwrap();
    a.commit().unwrap();

    // B opens the same file and sees the committed state.
    let b = Database::open(&path).unwrap();
    let root_b = b.root().unwrap();
    assert_eq!(root_b.get("name").unwrap(), Some(Value::from("James")));

    // A commits a new name; B does not see it until it begins a new
    // transaction.
    a.checkout(&root_a).unwrap();
    root_a.set("name", "Jane").unwrap();
    a.commit().unwrap();

    assert_eq!(root_b.get("name").unwrap(), Some(Value::from("James")));
    assert_eq!(a.tx_count() - b.tx_count(), 1);

    b.begin().unwrap();
    assert_eq!(root_b.get("name").unwrap(), Some(Value::from("Jane")));
    assert_eq!(a.tx_count(), b.tx_count());
}

#[test]
fn write_conflict_first_committer_wins() {
    let tmp = TempDir::new().unwrap();
    let db = Arc::new(Database::open(tmp.path().join("data.db")).unwrap());

    let root = Persistent::new();
    root.set("name", "initial").unwrap();
    db.elect(&root).unwrap();
    db.commit().unwrap();
    let before = db.tx_count();

    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let db_w = Arc::clone(&db);
    let root_w = Arc::clone(&root);
    let winner = thread::spawn(move || {
        db_w.checkout(&root_w).unwrap();
        root_w.set("name", "Bob").unwrap();
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        db_w.commit().unwrap();
    });

    // Check out before the winner commits, so both transactions are
    // based on the same version.
    ready_rx.recv().unwrap();
    db.checkout(&root).unwrap();
    root.set("name", "Bill").unwrap();

    go_tx.send(()).unwrap();
    winner.join().unwrap();

    let err = db.commit().unwrap_err();
    assert!(matches!(err, DbError::WriteConflict { .. }));
    db.abort();

    // First committer's value persists; the failed attempt is
    // recorded as a failure marker.
    assert_eq!(root.get("name").unwrap(), Some(Value::from("Bob")));
    assert_eq!(db.tx_count(), before + 2);
}

#[test]
fn conflict_resolution_merges_counters() {
    let tmp = TempDir::new().unwrap();
    let db = Arc::new(Database::open(tmp.path().join("data.db")).unwrap());
    db.resolvers().register("counter", CounterResolver);

    let root = Persistent::with_kind("counter");
    root.set("count", 0i64).unwrap();
    db.elect(&root).unwrap();
    db.commit().unwrap();
    let before = db.tx_count();

    let hit = |db: &Database, obj: &grove_db::PRef| {
        db.checkout(obj).unwrap();
        let n = obj.get("count").unwrap().and_then(|v| v.as_int()).unwrap_or(0);
        obj.set("count", n + 1).unwrap();
    };

    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let db_w = Arc::clone(&db);
    let root_w = Arc::clone(&root);
    let winner = thread::spawn(move || {
        db_w.checkout(&root_w).unwrap();
        let n = root_w.get("count").unwrap().and_then(|v| v.as_int()).unwrap_or(0);
        root_w.set("count", n + 1).unwrap();
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        db_w.commit().unwrap();
    });

    ready_rx.recv().unwrap();
    hit(&db, &root);
    go_tx.send(()).unwrap();
    winner.join().unwrap();

    // Both increments started from 0; the resolver sums the diffs.
    db.commit().unwrap();
    assert_eq!(root.get("count").unwrap(), Some(Value::Int(2)));
    assert_eq!(db.tx_count(), before + 2);
}

#[test]
fn unreachable_object_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("data.db")).unwrap();

    let root = Persistent::new();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    // A checked-out object never connected to the graph fails the
    // commit.
    let x = Persistent::new();
    db.checkout(&x).unwrap();
    let err = db.commit().unwrap_err();
    assert!(matches!(err, DbError::ObjectGraph { .. }));
    db.abort();

    // Reaching it through the root makes the retry succeed.
    let x = Persistent::new();
    x.set("tag", "leaf").unwrap();
    db.checkout(&root).unwrap();
    root.set("x", Value::from(&x)).unwrap();
    db.commit().unwrap();

    assert_eq!(db.len(), 2);
    assert!(x.oid().is_some());
    assert_eq!(x.get("tag").unwrap(), Some(Value::from("leaf")));
}

#[test]
fn blob_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data.db");
    let db = Database::open(&path).unwrap();

    let root = Persistent::new();
    root.set("file", Blob::from_bytes(b"abc".to_vec())).unwrap();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    let blob = root.get("file").unwrap().unwrap().as_blob().cloned().unwrap();
    assert!(!blob.is_pending());

    // Stream API.
    assert_eq!(blob.read_all().unwrap(), b"abc");

    // Independent chunked iteration; the handle is closed afterwards.
    let mut chunks = blob.chunks().unwrap();
    let mut collected = Vec::new();
    for chunk in &mut chunks {
        collected.extend(chunk.unwrap());
    }
    assert_eq!(collected, b"abc");
    assert!(chunks.is_closed());

    // A second instance observes the same bytes.
    let other = Database::open(&path).unwrap();
    other.begin().unwrap();
    let other_blob = other
        .root()
        .unwrap()
        .get("file")
        .unwrap()
        .unwrap()
        .as_blob()
        .cloned()
        .unwrap();
    assert_eq!(other_blob.read_all().unwrap(), b"abc");
}

#[test]
fn read_conflict_after_begin() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data.db");

    let a = Database::open(&path).unwrap();
    let root_a = Persistent::new();
    root_a.set("name", "initial").unwrap();
    a.elect(&root_a).unwrap();
    a.commit().unwrap();

    let b = Database::open(&path).unwrap();
    let root_b = b.root().unwrap();

    // A checks out, then B commits the same object through its own
    // instance.
    a.checkout(&root_a).unwrap();
    root_a.set("name", "Bill").unwrap();

    b.checkout(&root_b).unwrap();
    root_b.set("name", "Bob").unwrap();
    b.commit().unwrap();

    // A's begin invalidates its read set; the commit then fails as a
    // read conflict.
    a.begin().unwrap();
    let err = a.commit().unwrap_err();
    assert!(matches!(err, DbError::ReadConflict { .. }));
    a.abort();

    assert_eq!(root_a.get("name").unwrap(), Some(Value::from("Bob")));
}

/// Numbers references without queueing the referenced object, so its
/// record never reaches the log.
struct DanglingSave;

impl SaveContext for DanglingSave {
    fn object_ref(&mut self, _obj: &PRef) -> CodecResult<Oid> {
        Ok(Oid::new(7))
    }

    fn blob_ref(&mut self, _blob: &Blob) -> CodecResult<(u64, u64)> {
        unreachable!("state under test holds no blobs")
    }
}

#[test]
fn dangling_reference_reads_are_errors() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data.db");

    // Hand-write a root whose "friend" names an OID nobody ever
    // commits, the way a log written by a buggy or truncated foreign
    // writer could.
    {
        let log = TransactionLog::open(&path, LogConfig::default()).unwrap();
        let codec = BincodeCodec::new();

        let friend = Persistent::new();
        let mut state = StateMap::new();
        state.insert("friend".into(), Value::from(&friend));
        let payload = codec
            .save(Oid::new(0), "object", &state, &mut DanglingSave)
            .unwrap();

        let (mut handle, _) = log.begin_write().unwrap();
        handle.stage_object(&payload).unwrap();
        handle.commit().unwrap();
    }

    let db = Database::open(&path).unwrap();
    let root = db.root().unwrap();
    let ghost = root
        .get("friend")
        .unwrap()
        .unwrap()
        .as_object()
        .cloned()
        .unwrap();

    assert_eq!(ghost.oid(), Some(Oid::new(7)));
    assert!(ghost.status().is_ghost());

    // The reference never resolves; reading it says so instead of
    // pretending the attribute is merely absent.
    assert!(matches!(
        ghost.get("anything"),
        Err(ObjectError::UnresolvedGhost { oid }) if oid == Oid::new(7)
    ));

    // A loaded object with a missing attribute stays a plain miss.
    assert_eq!(root.get("missing").unwrap(), None);
}

#[test]
fn elect_constraints() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("data.db")).unwrap();

    let root = Persistent::new();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    // Only one root, ever.
    let second = Persistent::new();
    assert!(matches!(db.elect(&second), Err(DbError::RootExists)));

    // Persisted objects cannot be elected elsewhere either.
    let tmp2 = TempDir::new().unwrap();
    let other = Database::open(tmp2.path().join("other.db")).unwrap();
    assert!(matches!(
        other.elect(&root),
        Err(DbError::ElectPersisted)
    ));
}

#[test]
fn foreign_objects_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let a = Database::open(tmp.path().join("a.db")).unwrap();
    let b = Database::open(tmp.path().join("b.db")).unwrap();

    let root_a = Persistent::new();
    a.elect(&root_a).unwrap();
    a.commit().unwrap();

    assert!(matches!(
        b.checkout(&root_a),
        Err(DbError::ForeignObject)
    ));

    // Referencing a foreign object from another database's graph
    // fails at commit.
    let root_b = Persistent::new();
    root_b.set("alien", Value::from(&root_a)).unwrap();
    b.elect(&root_b).unwrap();
    let err = b.commit().unwrap_err();
    assert!(matches!(err, DbError::Serialization { .. }));
}
