//! Tablet metadata layout in the [`KvStore`].
//!
//! Keys are fixed width and big-endian so that an ordered scan over a segment
//! prefix visits versions in ascending order:
//!
//! ```text
//! [kind: u8][tablet_id: u64 BE][segment_id: u32 BE][version: u64 BE]
//! ```
//!
//! `kind` is [`DEL_VECTOR_PREFIX`] or [`DELTA_COLUMN_GROUP_PREFIX`].

use crate::constants::{
    DEL_VECTOR_PREFIX, DELTA_COLUMN_GROUP_PREFIX, META_KEY_LEN, SEGMENT_KEY_PREFIX_LEN,
    TABLET_KEY_PREFIX_LEN,
};
use crate::del_vector::DelVector;
use crate::delta_column_group::{DeltaColumnGroup, DeltaColumnGroupList};
use crate::kv::{KvStore, WriteBatch};
use crate::types::{SegmentId, TabletId, TabletSegmentId, Version};
use llkv_result::{Error, Result};
use std::sync::Arc;

fn tablet_prefix(kind: u8, tablet_id: TabletId) -> Vec<u8> {
    let mut key = Vec::with_capacity(META_KEY_LEN);
    key.push(kind);
    key.extend_from_slice(&tablet_id.to_be_bytes());
    key
}

fn segment_prefix(kind: u8, tablet_id: TabletId, segment_id: SegmentId) -> Vec<u8> {
    let mut key = tablet_prefix(kind, tablet_id);
    key.extend_from_slice(&segment_id.to_be_bytes());
    key
}

fn meta_key(kind: u8, tablet_id: TabletId, segment_id: SegmentId, version: Version) -> Vec<u8> {
    let mut key = segment_prefix(kind, tablet_id, segment_id);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

/// Version component of a full metadata key.
fn key_version(key: &[u8]) -> Result<Version> {
    if key.len() != META_KEY_LEN {
        tracing::warn!("malformed metadata key {:?}", key);
        return Err(Error::corruption(format!(
            "metadata key has length {}, expected {META_KEY_LEN}",
            key.len()
        )));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&key[SEGMENT_KEY_PREFIX_LEN..]);
    Ok(Version::from_be_bytes(raw))
}

/// Segment id component of a full metadata key.
fn key_segment(key: &[u8]) -> Result<SegmentId> {
    if key.len() != META_KEY_LEN {
        return Err(Error::corruption(format!(
            "metadata key has length {}, expected {META_KEY_LEN}",
            key.len()
        )));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&key[TABLET_KEY_PREFIX_LEN..SEGMENT_KEY_PREFIX_LEN]);
    Ok(SegmentId::from_be_bytes(raw))
}

pub fn del_vector_key(tablet_id: TabletId, segment_id: SegmentId, version: Version) -> Vec<u8> {
    meta_key(DEL_VECTOR_PREFIX, tablet_id, segment_id, version)
}

pub fn delta_column_group_key(tsid: TabletSegmentId, version: Version) -> Vec<u8> {
    meta_key(
        DELTA_COLUMN_GROUP_PREFIX,
        tsid.tablet_id,
        tsid.segment_id,
        version,
    )
}

/// Load the newest delete vector with version `<= version`.
///
/// Also returns the latest version persisted for the segment, regardless of
/// the requested one. A segment with no persisted vector reads as an empty
/// vector at version 0 with latest version 0.
pub fn get_del_vector<S>(
    meta: &S,
    tablet_id: TabletId,
    segment_id: SegmentId,
    version: Version,
) -> Result<(DelVector, Version)>
where
    S: KvStore + ?Sized,
{
    let entries = meta.scan_prefix(&segment_prefix(DEL_VECTOR_PREFIX, tablet_id, segment_id))?;
    let latest_version = match entries.last() {
        Some((key, _)) => key_version(key)?,
        None => return Ok((DelVector::new(0), 0)),
    };

    let mut found = None;
    for (key, bytes) in entries.iter().rev() {
        if key_version(key)? <= version {
            found = Some(bytes);
            break;
        }
    }
    let delvec = match found {
        Some(bytes) => DelVector::decode(bytes)?,
        None => DelVector::new(0),
    };
    Ok((delvec, latest_version))
}

pub fn put_del_vector(
    batch: &mut WriteBatch,
    tablet_id: TabletId,
    segment_id: SegmentId,
    delvec: &DelVector,
) -> Result<()> {
    batch.put(
        del_vector_key(tablet_id, segment_id, delvec.version()),
        delvec.encode()?,
    );
    Ok(())
}

pub fn set_del_vector<S>(
    meta: &S,
    tablet_id: TabletId,
    segment_id: SegmentId,
    delvec: &DelVector,
) -> Result<()>
where
    S: KvStore + ?Sized,
{
    let mut batch = WriteBatch::new();
    put_del_vector(&mut batch, tablet_id, segment_id, delvec)?;
    meta.write_batch(&batch)
}

/// Load every delta column group of a segment with version `<= version_ceiling`,
/// newest first.
pub fn get_delta_column_group<S>(
    meta: &S,
    tablet_id: TabletId,
    segment_id: SegmentId,
    version_ceiling: Version,
) -> Result<DeltaColumnGroupList>
where
    S: KvStore + ?Sized,
{
    let entries = meta.scan_prefix(&segment_prefix(
        DELTA_COLUMN_GROUP_PREFIX,
        tablet_id,
        segment_id,
    ))?;
    let mut dcgs = Vec::with_capacity(entries.len());
    for (key, bytes) in entries.iter().rev() {
        if key_version(key)? > version_ceiling {
            continue;
        }
        dcgs.push(Arc::new(DeltaColumnGroup::decode(bytes)?));
    }
    Ok(dcgs)
}

pub fn put_delta_column_group(
    batch: &mut WriteBatch,
    tsid: TabletSegmentId,
    dcg: &DeltaColumnGroup,
) {
    batch.put(delta_column_group_key(tsid, dcg.version()), dcg.encode());
}

pub fn set_delta_column_group<S>(meta: &S, tsid: TabletSegmentId, dcg: &DeltaColumnGroup) -> Result<()>
where
    S: KvStore + ?Sized,
{
    let mut batch = WriteBatch::new();
    put_delta_column_group(&mut batch, tsid, dcg);
    meta.write_batch(&batch)
}

pub fn delete_delta_column_group(batch: &mut WriteBatch, tsid: TabletSegmentId, version: Version) {
    batch.delete(delta_column_group_key(tsid, version));
}

/// Segment ids of `tablet_id` that have at least one persisted delete vector.
pub fn list_del_vector_segments<S>(meta: &S, tablet_id: TabletId) -> Result<Vec<SegmentId>>
where
    S: KvStore + ?Sized,
{
    let entries = meta.scan_prefix(&tablet_prefix(DEL_VECTOR_PREFIX, tablet_id))?;
    let mut segments = Vec::new();
    for (key, _) in &entries {
        let segment = key_segment(key)?;
        if segments.last() != Some(&segment) {
            segments.push(segment);
        }
    }
    Ok(segments)
}

/// Remove every delete vector and delta column group of a tablet in one
/// atomic batch. Returns the number of keys removed.
pub fn delete_tablet_meta<S>(meta: &S, tablet_id: TabletId) -> Result<usize>
where
    S: KvStore + ?Sized,
{
    let mut batch = WriteBatch::new();
    for kind in [DEL_VECTOR_PREFIX, DELTA_COLUMN_GROUP_PREFIX] {
        for (key, _) in meta.scan_prefix(&tablet_prefix(kind, tablet_id))? {
            batch.delete(key);
        }
    }
    let removed = batch.len();
    if removed > 0 {
        meta.write_batch(&batch)?;
    }
    tracing::debug!("deleted {} metadata keys of tablet {}", removed, tablet_id);
    Ok(removed)
}
