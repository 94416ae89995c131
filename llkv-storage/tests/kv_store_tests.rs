use llkv_result::Error;
use llkv_storage::kv::{InstrumentedKvStore, KvStore, MemKvStore, WriteBatch};
use llkv_storage::tablet_meta;
use llkv_storage::{DelVector, DeltaColumnGroup, TabletSegmentId, Version};

#[test]
fn prefix_scan_is_ordered_and_bounded() {
    let store = MemKvStore::new();
    let mut batch = WriteBatch::new();
    for key in ["p/3", "p/1", "q/0", "p/2", "o/9"] {
        batch.put(key.as_bytes().to_vec(), vec![0]);
    }
    batch.delete(b"p/2".to_vec());
    store.write_batch(&batch).unwrap();

    let keys: Vec<_> = store
        .scan_prefix(b"p/")
        .unwrap()
        .into_iter()
        .map(|(k, _)| String::from_utf8(k).unwrap())
        .collect();
    assert_eq!(keys, vec!["p/1", "p/3"]);
    assert_eq!(store.len(), 4);
}

#[test]
fn failed_batch_applies_nothing() {
    let store = MemKvStore::new();
    tablet_meta::set_del_vector(&store, 1, 0, &DelVector::from_ordinals(1, [3])).unwrap();

    let mut batch = WriteBatch::new();
    tablet_meta::put_del_vector(&mut batch, 1, 0, &DelVector::from_ordinals(2, [3, 4])).unwrap();
    tablet_meta::put_del_vector(&mut batch, 1, 1, &DelVector::from_ordinals(2, [0])).unwrap();

    store.inject_write_failure(true);
    let err = store.write_batch(&batch).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(store.len(), 1);

    store.inject_write_failure(false);
    store.write_batch(&batch).unwrap();
    let (dv, latest) = tablet_meta::get_del_vector(&store, 1, 0, Version::MAX).unwrap();
    assert_eq!((dv.version(), latest, dv.cardinality()), (2, 2, 2));
}

#[test]
fn instrumented_store_counts_traffic() {
    let (store, stats) = InstrumentedKvStore::new(MemKvStore::new());
    let tsid = TabletSegmentId::new(9, 4);

    tablet_meta::set_delta_column_group(
        &store,
        tsid,
        &DeltaColumnGroup::new(3, vec![1], "a.cols".into(), 2),
    )
    .unwrap();
    tablet_meta::set_delta_column_group(
        &store,
        tsid,
        &DeltaColumnGroup::new(5, vec![2], "b.cols".into(), 2),
    )
    .unwrap();
    let snap = stats.snapshot();
    assert_eq!(snap.write_batches, 2);
    assert_eq!(snap.puts, 2);
    assert!(snap.put_bytes > 0);

    let dcgs = tablet_meta::get_delta_column_group(&store, 9, 4, 4).unwrap();
    assert_eq!(dcgs.len(), 1);
    assert_eq!(dcgs[0].file_name(), "a.cols");

    let delta = stats.snapshot().delta_since(&snap);
    assert_eq!(delta.scans, 1);
    assert_eq!(delta.entries_scanned, 2);
    assert_eq!(delta.store_calls(), 1);

    assert_eq!(tablet_meta::delete_tablet_meta(&store, 9).unwrap(), 2);
    assert_eq!(stats.snapshot().deletes, 2);
    assert!(store.inner().is_empty());

    stats.reset();
    assert_eq!(stats.snapshot().store_calls(), 0);
}

#[test]
fn tablets_do_not_share_key_ranges() {
    let store = MemKvStore::new();
    for tablet_id in [1u64, 2, 256] {
        tablet_meta::set_del_vector(&store, tablet_id, 0, &DelVector::from_ordinals(1, [0])).unwrap();
        tablet_meta::set_del_vector(&store, tablet_id, 7, &DelVector::from_ordinals(1, [0])).unwrap();
    }
    assert_eq!(tablet_meta::list_del_vector_segments(&store, 2).unwrap(), vec![0, 7]);
    assert_eq!(tablet_meta::delete_tablet_meta(&store, 2).unwrap(), 2);
    assert!(tablet_meta::list_del_vector_segments(&store, 2).unwrap().is_empty());
    assert_eq!(tablet_meta::list_del_vector_segments(&store, 256).unwrap(), vec![0, 7]);
    assert_eq!(store.len(), 4);
}
