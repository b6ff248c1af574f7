//! Universal invariants: identity stability, shared immutability,
//! serial monotonicity, transaction totality, snapshot round-trips,
//! and reference idempotence.

use std::sync::Arc;

use grove_db::{Blob, Database, DbError, ObjectError, Persistent, Serial, Value};
use tempfile::TempDir;

#[test]
fn identity_is_stable_across_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("data.db")).unwrap();

    let root = Persistent::new();
    let addr = Persistent::address(&root);
    root.set("n", 1i64).unwrap();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    db.checkout(&root).unwrap();
    root.set("n", 2i64).unwrap();
    db.abort();

    db.checkout(&root).unwrap();
    root.set("n", 3i64).unwrap();
    db.commit().unwrap();

    assert_eq!(Persistent::address(&root), addr);
    let found = db.root().unwrap();
    assert!(Arc::ptr_eq(&found, &root));
}

#[test]
fn shared_objects_reject_writes() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("data.db")).unwrap();

    let root = Persistent::new();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    assert!(root.status().is_shared());
    assert!(matches!(
        root.set("x", 1i64),
        Err(ObjectError::ReadOnly)
    ));
    assert!(matches!(root.remove("x"), Err(ObjectError::ReadOnly)));
}

#[test]
fn serials_increase_monotonically() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("data.db")).unwrap();

    let root = Persistent::new();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    let mut last = root.serial();
    assert!(last.is_valid());

    for i in 0..5i64 {
        db.checkout(&root).unwrap();
        root.set("i", i).unwrap();
        db.commit().unwrap();
        let serial = root.serial();
        assert!(serial > last);
        last = serial;
    }
}

#[test]
fn tx_count_equals_successes_plus_failures() {
    let tmp = TempDir::new().unwrap();
    let db = Arc::new(Database::open(tmp.path().join("data.db")).unwrap());

    let root = Persistent::new();
    root.set("name", "a").unwrap();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    let mut successes = 1u64;
    let mut failures = 0u64;

    for i in 0..4i64 {
        // Even rounds commit cleanly; odd rounds stage a conflict by
        // letting another thread commit first.
        db.checkout(&root).unwrap();
        root.set("i", i).unwrap();

        if i % 2 == 1 {
            let db_w = Arc::clone(&db);
            let root_w = Arc::clone(&root);
            std::thread::spawn(move || {
                db_w.checkout(&root_w).unwrap();
                root_w.set("i", 100 + i).unwrap();
                db_w.commit().unwrap();
            })
            .join()
            .unwrap();
            successes += 1;

            assert!(db.commit().unwrap_err().is_conflict());
            db.abort();
            failures += 1;
        } else {
            db.commit().unwrap();
            successes += 1;
        }
    }

    assert_eq!(db.tx_count(), successes + failures);
}

#[test]
fn snapshot_roundtrip_preserves_graph() {
    let tmp = TempDir::new().unwrap();
    let src_path = tmp.path().join("src.db");
    let dst_path = tmp.path().join("dst.db");

    let db = Database::open(&src_path).unwrap();
    let root = Persistent::new();
    root.set("name", "root").unwrap();

    let child = Persistent::with_kind("child");
    child.set("payload", Blob::from_bytes(b"blob body".to_vec())).unwrap();
    child.set("parent", Value::from(&root)).unwrap(); // cycle
    root.set("child", Value::from(&child)).unwrap();
    root.set("list", Value::List(vec![Value::from(&child), Value::Int(7)])).unwrap();

    db.elect(&root).unwrap();
    db.commit().unwrap();
    db.checkout(&root).unwrap();
    root.set("extra", 1i64).unwrap();
    db.commit().unwrap();
    assert!(db.tx_count() > 1);

    // Collapse into the target.
    let target = Database::open(&dst_path).unwrap();
    db.snapshot(&target).unwrap();
    assert_eq!(target.tx_count(), 1);

    // A fresh instance of the target sees an isomorphic graph.
    let reopened = Database::open(&dst_path).unwrap();
    assert_eq!(reopened.tx_count(), 1);
    assert_eq!(reopened.len(), 2);

    let new_root = reopened.root().unwrap();
    assert_eq!(new_root.get("name").unwrap(), Some(Value::from("root")));
    assert_eq!(new_root.get("extra").unwrap(), Some(Value::Int(1)));

    let new_child = new_root
        .get("child")
        .unwrap()
        .unwrap()
        .as_object()
        .cloned()
        .unwrap();
    assert_eq!(new_child.kind(), "child");

    // The cycle survived and points at the same handles.
    let back = new_child
        .get("parent")
        .unwrap()
        .unwrap()
        .as_object()
        .cloned()
        .unwrap();
    assert!(Arc::ptr_eq(&back, &new_root));
    let in_list = new_root.get("list").unwrap().unwrap();
    match in_list {
        Value::List(items) => {
            assert!(Arc::ptr_eq(items[0].as_object().unwrap(), &new_child));
            assert_eq!(items[1], Value::Int(7));
        }
        other => panic!("expected list, got {:?}", other),
    }

    // Blob bytes were re-copied byte for byte.
    let blob = new_child
        .get("payload")
        .unwrap()
        .unwrap()
        .as_blob()
        .cloned()
        .unwrap();
    assert_eq!(blob.read_all().unwrap(), b"blob body");
}

#[test]
fn snapshot_target_must_be_empty() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("src.db")).unwrap();
    let root = Persistent::new();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    let target = Database::open(tmp.path().join("dst.db")).unwrap();
    let target_root = Persistent::new();
    target.elect(&target_root).unwrap();
    target.commit().unwrap();

    assert!(matches!(
        db.snapshot(&target),
        Err(DbError::SnapshotTargetNotEmpty)
    ));
}

#[test]
fn reference_idempotence_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data.db");

    {
        let db = Database::open(&path).unwrap();
        let root = Persistent::new();
        let friend = Persistent::new();
        friend.set("name", "friend").unwrap();
        root.set("friend", Value::from(&friend)).unwrap();
        root.set("self_meta", Value::Map(Default::default())).unwrap();
        db.elect(&root).unwrap();
        db.commit().unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.len(), 2);
    let root = db.root().unwrap();
    assert_eq!(
        root.get("self_meta").unwrap(),
        Some(Value::Map(Default::default()))
    );

    let friend = root
        .get("friend")
        .unwrap()
        .unwrap()
        .as_object()
        .cloned()
        .unwrap();
    assert_eq!(friend.get("name").unwrap(), Some(Value::from("friend")));

    // Saving and loading again produces the same attribute maps.
    db.checkout(&root).unwrap();
    db.commit().unwrap();

    let db2 = Database::open(&path).unwrap();
    let root2 = db2.root().unwrap();
    assert_eq!(
        root2.get("self_meta").unwrap(),
        Some(Value::Map(Default::default()))
    );
    let friend2 = root2
        .get("friend")
        .unwrap()
        .unwrap()
        .as_object()
        .cloned()
        .unwrap();
    assert_eq!(friend2.get("name").unwrap(), Some(Value::from("friend")));
}

#[test]
fn sticky_objects_retract_after_commit() {
    let tmp = TempDir::new().unwrap();
    let db = Arc::new(Database::open(tmp.path().join("data.db")).unwrap());

    let root = Persistent::new();
    root.set("v", 0i64).unwrap();
    db.elect(&root).unwrap();
    db.commit().unwrap();

    use std::sync::mpsc;
    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let db_h = Arc::clone(&db);
    let root_h = Arc::clone(&root);
    let holder = std::thread::spawn(move || {
        db_h.checkout(&root_h).unwrap();
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        db_h.abort();
    });

    ready_rx.recv().unwrap();
    db.checkout(&root).unwrap();
    root.set("v", 1i64).unwrap();
    db.commit().unwrap();

    // The other thread still holds its pre-commit overlay.
    assert!(root.status().is_sticky());

    go_tx.send(()).unwrap();
    holder.join().unwrap();
    assert!(root.status().is_shared());
    assert_eq!(root.get("v").unwrap(), Some(Value::Int(1)));
}

#[test]
fn serial_equals_commit_txid() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("data.db")).unwrap();

    let root = Persistent::new();
    db.elect(&root).unwrap();
    let txid = db.commit().unwrap();
    assert_eq!(root.serial(), Serial::from(txid));
}
