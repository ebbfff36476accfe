//! End-to-end scenarios from the core specification's testable properties.

use logcask::{Options, Store};

fn opts(max_size: u64, max_entries: u64) -> Options {
    Options { max_segment_size: max_size, max_entries_per_segment: max_entries, ..Options::default() }
}

#[test]
fn basic_put_get_overwrite() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Store::open(dir.path(), Options::default()).unwrap();

    store.put("a", b"1").unwrap();
    store.put("b", b"2").unwrap();
    store.put("a", b"3").unwrap();

    assert_eq!(store.get("a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.get("c").unwrap(), None);
}

#[test]
fn delete_then_put_again() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Store::open(dir.path(), Options::default()).unwrap();

    store.put("a", b"1").unwrap();
    store.delete("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);

    store.put("a", b"4").unwrap();
    assert_eq!(store.get("a").unwrap(), Some(b"4".to_vec()));
}

#[test]
fn rotation_on_entry_count_threshold() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Store::open(dir.path(), opts(1 << 20, 3)).unwrap();

    store.put("k1", b"v1").unwrap();
    store.put("k2", b"v2").unwrap();
    store.put("k3", b"v3").unwrap();
    store.put("k4", b"v4").unwrap();

    assert!(dir.path().join("segment_0.log").exists());
    assert!(dir.path().join("segment_1.log").exists());
    assert_eq!(store.get("k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(store.get("k4").unwrap(), Some(b"v4".to_vec()));
}

#[test]
fn close_then_reopen_preserves_state() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    {
        let store = Store::open(dir.path(), Options::default()).unwrap();
        store.put("x", b"old").unwrap();
        store.close().unwrap();
    }
    {
        let store = Store::open(dir.path(), Options::default()).unwrap();
        assert_eq!(store.get("x").unwrap(), Some(b"old".to_vec()));
        store.put("x", b"new").unwrap();
        assert_eq!(store.get("x").unwrap(), Some(b"new".to_vec()));
    }
}

#[test]
fn sidecars_are_regenerated_after_deletion() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    {
        let store = Store::open(dir.path(), opts(1 << 20, 200)).unwrap();
        for i in 0..1000u32 {
            store.put(&format!("key-{i}"), format!("value-{i}").as_bytes()).unwrap();
        }
        store.close().unwrap();
    }

    // Delete every sidecar file; only the `.log` files remain.
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".hint") || name.ends_with(".index") {
            std::fs::remove_file(entry.path()).unwrap();
        }
    }

    let store = Store::open(dir.path(), opts(1 << 20, 200)).unwrap();
    for i in 0..1000u32 {
        assert_eq!(store.get(&format!("key-{i}")).unwrap(), Some(format!("value-{i}").into_bytes()));
    }
}

#[test]
fn operations_after_close_fail() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Store::open(dir.path(), Options::default()).unwrap();
    store.close().unwrap();
    assert!(matches!(store.put("a", b"1"), Err(logcask::Error::StoreClosed)));
    assert!(matches!(store.get("a"), Err(logcask::Error::StoreClosed)));
    assert!(matches!(store.delete("a"), Err(logcask::Error::StoreClosed)));
}

#[test]
fn second_open_on_same_directory_is_rejected() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Store::open(dir.path(), Options::default()).unwrap();
    let err = Store::open(dir.path(), Options::default()).unwrap_err();
    assert!(matches!(err, logcask::Error::AlreadyLocked { .. }));
    drop(store);
    assert!(Store::open(dir.path(), Options::default()).is_ok());
}

#[test]
fn empty_and_oversized_keys_are_rejected() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Store::open(dir.path(), opts(1 << 20, 1000)).unwrap();
    assert!(matches!(store.put("", b"v"), Err(logcask::Error::InvalidKey(_))));
    let huge_key = "x".repeat(2000);
    assert!(matches!(store.put(&huge_key, b"v"), Err(logcask::Error::InvalidKey(_))));
}

#[test]
fn oversized_value_is_rejected() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Store::open(dir.path(), Options { max_value_size: 16, ..opts(1 << 20, 1000) }).unwrap();
    let err = store.put("k", &vec![0u8; 32]).unwrap_err();
    assert!(matches!(err, logcask::Error::OversizedValue { .. }));
}

#[test]
fn concurrent_reads_and_a_disjoint_write_all_succeed() {
    use std::sync::Arc;
    use std::thread;

    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let store = Arc::new(Store::open(dir.path(), Options::default()).unwrap());
    store.put("existing", b"pre").unwrap();

    let reader_store = store.clone();
    let reader = thread::spawn(move || {
        for _ in 0..200 {
            let value = reader_store.get("existing").unwrap();
            assert_eq!(value, Some(b"pre".to_vec()));
        }
    });

    let writer_store = store.clone();
    let writer = thread::spawn(move || {
        writer_store.put("other", b"new").unwrap();
    });

    reader.join().unwrap();
    writer.join().unwrap();
    assert_eq!(store.get("other").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn invalid_config_is_rejected_at_open() {
    let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
    let bad = Options { max_segment_size: 32, max_value_size: 1024 * 1024, ..Options::default() };
    assert!(matches!(Store::open(dir.path(), bad).unwrap_err(), logcask::Error::InvalidConfig(_)));
}
