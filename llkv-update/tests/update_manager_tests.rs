mod common;

use common::*;
use crossbeam_channel as xchan;
use llkv_result::{Error, Result};
use llkv_storage::kv::{KvStore, MemKvStore, WriteBatch};
use llkv_storage::tablet_meta;
use llkv_storage::{DelVector, DeltaColumnGroup, TabletId, TabletSegmentId};
use llkv_update::{MemRowset, PartialUpdateMode, RowLocation, Rowset, UpdateConfig, UpdateManager};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn apply_then_read_needs_no_store_access() {
    let mgr = manager();
    let (_raw, store, stats) = counted_store();
    let tablet = tablet_with_rows(1, "/data/1", 4);
    let rowset = upsert_rowset(2, 1, vec![key(1), key(3)]);

    mgr.on_rowset_finished(&as_dyn(&tablet), &rowset).unwrap();
    assert!(mgr.update_state_exists(1, &rowset));

    let applied = mgr.apply_rowset(&store, &*tablet, &rowset, 2).unwrap();
    assert_eq!(applied.upserts, 2);
    assert_eq!(applied.new_deletes, 2);
    assert_eq!(applied.delvec_segments, 1);
    assert!(!applied.recomputed_state);
    assert!(!mgr.update_state_exists(1, &rowset));

    let before = stats.snapshot();
    let tsid = TabletSegmentId::new(1, 0);
    let dv = mgr.get_del_vec(&store, tsid, 2).unwrap();
    assert_eq!(dv.version(), 2);
    assert!(dv.contains(1) && dv.contains(3));
    assert!(!dv.contains(0));
    let later = mgr.get_del_vec(&store, tsid, 10).unwrap();
    assert!(Arc::ptr_eq(&dv, &later));
    assert_eq!(stats.snapshot().delta_since(&before).store_calls(), 0);
}

#[test]
fn stale_cached_vector_served_for_newer_read() {
    let mgr = manager();
    let (_raw, store, stats) = counted_store();
    let tsid = TabletSegmentId::new(7, 3);
    tablet_meta::set_del_vector(&store, 7, 3, &DelVector::from_ordinals(5, [4, 8, 9])).unwrap();

    // populate the cache at version 5
    let dv = mgr.get_del_vec(&store, tsid, 5).unwrap();
    assert_eq!(dv.version(), 5);

    let before = stats.snapshot();
    let dv = mgr.get_del_vec(&store, tsid, 7).unwrap();
    assert_eq!(dv.version(), 5);
    assert_eq!(dv.cardinality(), 3);
    assert_eq!(stats.snapshot().delta_since(&before).store_calls(), 0);
}

#[test]
fn older_read_than_cached_goes_to_store() {
    let mgr = manager();
    let (_raw, store, stats) = counted_store();
    let tsid = TabletSegmentId::new(7, 0);
    tablet_meta::set_del_vector(&store, 7, 0, &DelVector::from_ordinals(2, [1])).unwrap();
    tablet_meta::set_del_vector(&store, 7, 0, &DelVector::from_ordinals(6, [1, 2])).unwrap();

    assert_eq!(mgr.get_latest_del_vec(&store, tsid).unwrap().version(), 6);

    let before = stats.snapshot();
    let dv = mgr.get_del_vec(&store, tsid, 4).unwrap();
    assert_eq!(dv.version(), 2);
    assert_eq!(dv.cardinality(), 1);
    assert_eq!(stats.snapshot().delta_since(&before).scans, 1);

    // the older load did not displace the newer cached vector
    assert_eq!(mgr.get_latest_del_vec(&store, tsid).unwrap().version(), 6);
}

#[test]
fn cached_versions_never_move_backwards() {
    let mgr = manager();
    let store = MemKvStore::new();
    let tsid = TabletSegmentId::new(3, 1);

    mgr.set_cached_del_vec(tsid, Arc::new(DelVector::from_ordinals(1, [0])))
        .unwrap();
    mgr.set_cached_del_vec(tsid, Arc::new(DelVector::from_ordinals(2, [0, 1])))
        .unwrap();
    for stale in [1, 2] {
        let err = mgr
            .set_cached_del_vec(tsid, Arc::new(DelVector::from_ordinals(stale, [5])))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
    assert_eq!(mgr.get_latest_del_vec(&store, tsid).unwrap().version(), 2);

    let dcg = |v| Arc::new(DeltaColumnGroup::new(v, vec![1], format!("{v}.cols"), 1));
    tablet_meta::set_delta_column_group(&store, tsid, &dcg(3)).unwrap();
    // a miss reloads the persisted list
    mgr.set_cached_delta_column_group(&store, tsid, dcg(3)).unwrap();
    for stale in [2, 3] {
        let err = mgr
            .set_cached_delta_column_group(&store, tsid, dcg(stale))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
    mgr.set_cached_delta_column_group(&store, tsid, dcg(5)).unwrap();
    let versions: Vec<_> = mgr
        .get_cached_delta_column_group(tsid, u64::MAX)
        .unwrap()
        .iter()
        .map(|d| d.version())
        .collect();
    assert_eq!(versions, vec![5, 3]);
}

#[test]
fn apply_rebuilds_missing_state() {
    let mgr = manager();
    let (_raw, store, _) = counted_store();
    let tablet = tablet_with_rows(2, "/data/2", 3);
    let rowset = upsert_rowset(4, 1, vec![key(0), key(10)]).with_deletes(vec![key(2), key(99)]);

    let applied = mgr.apply_rowset(&store, &*tablet, &rowset, 3).unwrap();
    assert!(applied.recomputed_state);
    assert_eq!(applied.upserts, 2);
    assert_eq!(applied.deletes, 2);
    // k0 was rewritten and k2 deleted; k99 never existed
    assert_eq!(applied.new_deletes, 2);

    let dv = mgr.get_del_vec(&store, TabletSegmentId::new(2, 0), 3).unwrap();
    assert_eq!(dv.bitmap().iter().collect::<Vec<_>>(), vec![0, 2]);

    let index = mgr.get_index(&*tablet).unwrap();
    let state = index.lock();
    assert_eq!(state.get(&key(0)), Some(RowLocation::new(1, 0)));
    assert_eq!(state.get(&key(10)), Some(RowLocation::new(1, 1)));
    assert_eq!(state.get(&key(2)), None);
}

#[test]
fn failed_metadata_write_invalidates_index() {
    let mgr = manager();
    let (raw, store, _) = counted_store();
    let tablet = tablet_with_rows(3, "/data/3", 2);
    let rowset = upsert_rowset(5, 1, vec![key(0)]);

    mgr.on_rowset_finished(&as_dyn(&tablet), &rowset).unwrap();
    raw.inject_write_failure(true);
    let err = mgr.apply_rowset(&store, &*tablet, &rowset, 2).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(mgr.index_cache().get(&3).is_none());
    assert!(!mgr.update_state_exists(3, &rowset));
    assert!(raw.is_empty());

    raw.inject_write_failure(false);
    let applied = mgr.apply_rowset(&store, &*tablet, &rowset, 2).unwrap();
    assert!(applied.recomputed_state);
    assert_eq!(applied.new_deletes, 1);
    assert!(mgr.get_del_vec(&store, TabletSegmentId::new(3, 0), 2).unwrap().contains(0));
}

#[test]
fn applying_at_a_persisted_version_is_rejected() {
    let mgr = manager();
    let store = MemKvStore::new();
    let tablet = tablet_with_rows(4, "/data/4", 2);
    tablet_meta::set_del_vector(&store, 4, 0, &DelVector::from_ordinals(9, [1])).unwrap();

    let rowset = upsert_rowset(6, 1, vec![key(0)]);
    let err = mgr.apply_rowset(&store, &*tablet, &rowset, 9).unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[test]
fn column_mode_apply_writes_delta_column_groups() {
    let mgr = manager();
    mgr.init().unwrap();
    let (_raw, store, stats) = counted_store();
    let tablet = tablet_with_rows(5, "/data/5", 4);
    let rowset = upsert_rowset(3, 1, vec![key(1), key(2), key(9)])
        .with_partial_update(PartialUpdateMode::Column, vec![4, 5]);

    mgr.on_rowset_finished(&as_dyn(&tablet), &rowset).unwrap();
    assert!(mgr.update_state_exists(5, &rowset));

    let applied = mgr.apply_rowset(&store, &*tablet, &rowset, 3).unwrap();
    assert_eq!(applied.delta_column_groups, 1);
    assert_eq!(applied.upserts, 3);
    assert_eq!(applied.delvec_segments, 0);
    assert!(!mgr.update_state_exists(5, &rowset));

    let before = stats.snapshot();
    let dcgs = mgr
        .get_delta_column_group(&store, TabletSegmentId::new(5, 0), 3)
        .unwrap();
    assert_eq!(stats.snapshot().delta_since(&before).store_calls(), 0);
    assert_eq!(dcgs.len(), 1);
    assert_eq!(dcgs[0].column_ids(), &[4, 5]);
    assert_eq!(dcgs[0].row_count(), 2);
    assert_eq!(dcgs[0].file_name(), "3_0_3.cols");
    assert!(
        mgr.get_delta_column_group(&store, TabletSegmentId::new(5, 0), 2)
            .unwrap()
            .is_empty()
    );

    // the new key became a row of the rowset's first segment
    let rx = mgr
        .submit_index_lookup(as_dyn(&tablet), vec![key(9), key(1), key(42)])
        .unwrap();
    let found = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(
        found,
        vec![Some(RowLocation::new(1, 2)), Some(RowLocation::new(0, 1)), None]
    );
    mgr.stop();
}

#[test]
fn submit_apply_reports_through_channel() {
    let mgr = manager();
    mgr.init().unwrap();
    let raw = Arc::new(MemKvStore::new());
    let meta: Arc<dyn KvStore> = raw.clone();
    let tablet = tablet_with_rows(6, "/data/6", 3);
    let rowset: Arc<dyn Rowset> = Arc::new(upsert_rowset(2, 1, vec![key(0), key(1), key(2)]));

    let rx = mgr
        .submit_apply(Arc::clone(&meta), as_dyn(&tablet), rowset, 2)
        .unwrap();
    let applied = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(applied.new_deletes, 3);
    assert_eq!(
        mgr.get_del_vec(&*meta, TabletSegmentId::new(6, 0), 2)
            .unwrap()
            .cardinality(),
        3
    );
    assert_eq!(mgr.primary_index_refcnt(6), 0);
    mgr.stop();
}

#[test]
fn memory_limit_during_preload_is_deferred() {
    let mgr = manager_with(UpdateConfig {
        preload_memory_limit_percent: 0,
        ..Default::default()
    });
    mgr.init().unwrap();
    let tablet = tablet_with_rows(7, "/data/7", 4);
    let rowset = upsert_rowset(3, 1, vec![key(0), key(1)])
        .with_partial_update(PartialUpdateMode::Row, vec![2]);

    mgr.on_rowset_finished(&as_dyn(&tablet), &rowset).unwrap();
    assert!(!mgr.update_state_exists(7, &rowset));
    assert_eq!(mgr.update_state_mem_tracker().consumption(), 0);
    // the index preload itself still happened
    assert!(mgr.index_cache().get(&7).is_some_and(|h| h.is_loaded()));
    mgr.stop();
}

#[test]
fn row_partial_update_prepares_old_locations() {
    let mgr = manager();
    mgr.init().unwrap();
    let tablet = tablet_with_rows(8, "/data/8", 4);
    let rowset = upsert_rowset(3, 1, vec![key(2), key(50)])
        .with_partial_update(PartialUpdateMode::Row, vec![2]);

    mgr.on_rowset_finished(&as_dyn(&tablet), &rowset).unwrap();
    assert!(mgr.update_state_exists(8, &rowset));
    assert!(mgr.update_state_mem_tracker().consumption() > 0);

    mgr.on_rowset_cancel(&*tablet, &rowset);
    assert!(!mgr.update_state_exists(8, &rowset));
    assert_eq!(mgr.update_state_mem_tracker().consumption(), 0);
    mgr.stop();
}

#[test]
fn slow_index_preload_reports_uninitialized() {
    let mgr = manager_with(UpdateConfig {
        pindex_load_wait: Duration::from_millis(20),
        ..Default::default()
    });
    mgr.init().unwrap();
    let tablet = tablet_with_rows(9, "/data/9", 2);
    tablet.set_scan_delay(Some(Duration::from_millis(300)));
    let rowset = upsert_rowset(3, 1, vec![key(0)]).with_partial_update(PartialUpdateMode::Column, vec![1]);

    let err = mgr.on_rowset_finished(&as_dyn(&tablet), &rowset).unwrap_err();
    assert!(matches!(err, Error::Uninitialized(_)));
    assert!(!mgr.update_state_exists(9, &rowset));
    mgr.stop();
}

#[test]
fn stop_is_idempotent_and_refuses_new_work() {
    let mgr = manager();
    let tablet = tablet_with_rows(10, "/data/10", 1);
    let rowset: Arc<dyn Rowset> = Arc::new(upsert_rowset(2, 1, vec![key(0)]));
    let meta: Arc<dyn KvStore> = Arc::new(MemKvStore::new());

    // not started yet
    let err = mgr
        .submit_apply(Arc::clone(&meta), as_dyn(&tablet), Arc::clone(&rowset), 2)
        .unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_)));

    mgr.init().unwrap();
    mgr.stop();
    mgr.stop();

    let err = mgr
        .submit_apply(Arc::clone(&meta), as_dyn(&tablet), rowset, 2)
        .unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_)));
    let err = mgr
        .submit_index_lookup(as_dyn(&tablet), vec![key(0)])
        .unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_)));
}

#[test]
fn dropping_a_tablet_forgets_everything() {
    let mgr = manager();
    let (raw, store, _) = counted_store();
    let tablet = tablet_with_rows(11, "/data/11", 3);
    mgr.apply_rowset(&store, &*tablet, &upsert_rowset(2, 1, vec![key(0)]), 2)
        .unwrap();
    let tsid = TabletSegmentId::new(11, 2);
    tablet_meta::set_delta_column_group(
        &store,
        tsid,
        &DeltaColumnGroup::new(2, vec![1], "2_2_2.cols".into(), 1),
    )
    .unwrap();
    mgr.get_delta_column_group(&store, tsid, 2).unwrap();

    // an unrelated tablet survives
    tablet_meta::set_del_vector(&store, 12, 0, &DelVector::from_ordinals(1, [0])).unwrap();

    let removed = mgr.drop_tablet_state(&store, 11).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(raw.len(), 1);
    assert!(mgr.index_cache().get(&11).is_none());
    assert!(mgr.get_cached_delta_column_group(tsid, 2).is_none());
    assert_eq!(
        mgr.get_del_vec(&store, TabletSegmentId::new(11, 0), 2)
            .unwrap()
            .version(),
        0
    );
}

#[test]
fn multi_segment_rowset_deletes_across_segments() {
    let mgr = manager();
    let store = MemKvStore::new();
    let tablet = tablet_with_rows(13, "/data/13", 4);
    let first = MemRowset::new(1, 1)
        .with_segment(vec![key(0), key(1)])
        .with_segment(vec![key(2)]);
    mgr.apply_rowset(&store, &*tablet, &first, 2).unwrap();

    // rewrite keys now living in segments 1 and 2
    let second = upsert_rowset(2, 3, vec![key(1), key(2)]);
    let applied = mgr.apply_rowset(&store, &*tablet, &second, 3).unwrap();
    assert_eq!(applied.delvec_segments, 2);

    let seg1 = mgr.get_del_vec(&store, TabletSegmentId::new(13, 1), 3).unwrap();
    let seg2 = mgr.get_del_vec(&store, TabletSegmentId::new(13, 2), 3).unwrap();
    assert_eq!(seg1.bitmap().iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(seg2.bitmap().iter().collect::<Vec<_>>(), vec![0]);

    // segment 0 kept its version-2 vector
    let seg0 = mgr.get_del_vec(&store, TabletSegmentId::new(13, 0), 3).unwrap();
    assert_eq!(seg0.version(), 2);
    assert_eq!(seg0.cardinality(), 3);
    assert_eq!(
        tablet_meta::list_del_vector_segments(&store, 13).unwrap(),
        vec![0, 1, 2]
    );
}

#[test]
fn busy_index_defers_apply_state_preparation() {
    let mgr = manager_with(UpdateConfig {
        index_lock_timeout: Duration::from_millis(10),
        ..Default::default()
    });
    mgr.init().unwrap();
    let tablet = tablet_with_rows(14, "/data/14", 4);
    assert!(mgr.get_index(&*tablet).unwrap().is_loaded());
    let rowset = upsert_rowset(3, 1, vec![key(1), key(7)]).with_partial_update(PartialUpdateMode::Row, vec![2]);

    let (locked_tx, locked_rx) = xchan::bounded(1);
    let (release_tx, release_rx) = xchan::bounded::<()>(1);
    let holder = {
        let mgr = Arc::clone(&mgr);
        let tablet = Arc::clone(&tablet);
        std::thread::spawn(move || {
            let handle = mgr.get_index(&*tablet).unwrap();
            let guard = handle.lock();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            drop(guard);
        })
    };
    locked_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let started = Instant::now();
    mgr.on_rowset_finished(&as_dyn(&tablet), &rowset).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!mgr.update_state_exists(14, &rowset));
    assert_eq!(mgr.update_state_mem_tracker().consumption(), 0);

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    mgr.stop();
}

/// Metadata store that notes, on every write, whether the tablet's index lock
/// was held at that moment.
struct IndexLockWitness {
    inner: MemKvStore,
    mgr: Arc<UpdateManager>,
    tablet_id: TabletId,
    writes: Mutex<Vec<bool>>,
}

impl KvStore for IndexLockWitness {
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let held = self.mgr.index_cache().get(&self.tablet_id).is_some_and(|index| {
            let busy = index.lock_timeout(Duration::ZERO).is_err();
            busy
        });
        self.writes.lock().unwrap().push(held);
        self.inner.write_batch(batch)
    }
}

#[test]
fn apply_persists_while_holding_the_index_lock() {
    let mgr = manager();
    let tablet = tablet_with_rows(15, "/data/15", 3);
    let store = IndexLockWitness {
        inner: MemKvStore::new(),
        mgr: Arc::clone(&mgr),
        tablet_id: 15,
        writes: Mutex::new(Vec::new()),
    };

    let rows = upsert_rowset(2, 1, vec![key(0), key(1)]);
    assert_eq!(mgr.apply_rowset(&store, &*tablet, &rows, 2).unwrap().new_deletes, 2);
    let cols = upsert_rowset(3, 2, vec![key(2)]).with_partial_update(PartialUpdateMode::Column, vec![1]);
    assert_eq!(mgr.apply_rowset(&store, &*tablet, &cols, 3).unwrap().delta_column_groups, 1);

    assert_eq!(*store.writes.lock().unwrap(), vec![true, true]);
    // the lock is free again once apply returns
    assert!(mgr.get_index(&*tablet).is_ok());
}

#[test]
fn concurrent_applies_keep_every_delete() {
    let mgr = manager();
    mgr.init().unwrap();
    let raw = Arc::new(MemKvStore::new());
    let meta: Arc<dyn KvStore> = raw.clone();
    let tablet = tablet_with_rows(16, "/data/16", 8);

    // versions interleave on the pool; later versions may land first and
    // reject earlier ones, but no applied delete may be lost
    let receivers: Vec<_> = (0..8usize)
        .map(|i| {
            let rowset: Arc<dyn Rowset> = Arc::new(upsert_rowset(10 + i as u64, 1 + i as u32, vec![key(i)]));
            mgr.submit_apply(Arc::clone(&meta), as_dyn(&tablet), rowset, 2 + i as u64)
                .unwrap()
        })
        .collect();
    let mut applied = Vec::new();
    for (i, rx) in receivers.into_iter().enumerate() {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Ok(_) => applied.push(i as u32),
            Err(e) => assert!(matches!(e, Error::Internal(_)), "unexpected error {e}"),
        }
    }
    assert!(!applied.is_empty());

    mgr.clear_cache();
    let persisted = mgr.get_latest_del_vec(&*meta, TabletSegmentId::new(16, 0)).unwrap();
    for ordinal in &applied {
        assert!(persisted.contains(*ordinal), "delete of row {ordinal} lost");
    }
    mgr.stop();
}

#[test]
fn stop_waits_for_in_flight_applies() {
    let mgr = manager();
    mgr.init().unwrap();
    let meta: Arc<dyn KvStore> = Arc::new(MemKvStore::new());
    let tablet = tablet_with_rows(17, "/data/17", 2);
    // the apply has to build the index first, which is slow
    tablet.set_scan_delay(Some(Duration::from_millis(200)));
    let rowset: Arc<dyn Rowset> = Arc::new(upsert_rowset(2, 1, vec![key(0)]));

    let rx = mgr
        .submit_apply(Arc::clone(&meta), as_dyn(&tablet), rowset, 2)
        .unwrap();
    mgr.stop();

    // the result was delivered before stop returned
    let applied = rx.try_recv().unwrap().unwrap();
    assert_eq!(applied.new_deletes, 1);
}
