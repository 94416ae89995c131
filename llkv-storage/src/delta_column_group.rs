//! Delta column groups: versioned partial-column overlays for a segment.
//!
//! A column-mode partial update does not rewrite the rows it touches. It
//! writes the new values of the updated columns to a separate file and records
//! a [`DeltaColumnGroup`] pointing at it. A segment accumulates groups over
//! time; readers pick the ones visible at their snapshot version.

use crate::constants::DELTA_COLUMN_GROUP_DIR;
use crate::types::{TabletSegmentId, Version};
use bitcode::{Decode, Encode};
use llkv_result::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type DeltaColumnGroupPtr = Arc<DeltaColumnGroup>;

/// Groups of one segment, newest version first.
pub type DeltaColumnGroupList = Vec<DeltaColumnGroupPtr>;

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct DeltaColumnGroup {
    version: Version,
    column_ids: Vec<u32>,
    file_name: String,
    row_count: u32,
}

impl DeltaColumnGroup {
    pub fn new(version: Version, column_ids: Vec<u32>, file_name: String, row_count: u32) -> Self {
        Self {
            version,
            column_ids,
            file_name,
            row_count,
        }
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn column_ids(&self) -> &[u32] {
        &self.column_ids
    }

    #[inline]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[inline]
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Location of the overlay file under `tablet_path`.
    pub fn file_path(&self, tablet_path: &Path) -> PathBuf {
        tablet_path.join(DELTA_COLUMN_GROUP_DIR).join(&self.file_name)
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.column_ids.len() * std::mem::size_of::<u32>()
            + self.file_name.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bitcode::decode(bytes).map_err(|e| Error::corruption(format!("delta column group: {e}")))
    }
}

pub fn list_memory_usage(list: &[DeltaColumnGroupPtr]) -> usize {
    list.iter().map(|dcg| dcg.memory_usage()).sum()
}

/// Groups visible at `version`, preserving newest-first order.
pub fn search_by_version(list: &[DeltaColumnGroupPtr], version: Version) -> DeltaColumnGroupList {
    list.iter()
        .filter(|dcg| dcg.version() <= version)
        .cloned()
        .collect()
}

/// Drop every group older than `min_readable_version` from `list`.
///
/// Each removed group is reported as a `(tsid, version)` metadata key in
/// `clear_dcgs` and as a file to delete in `clear_files`. Returns how many
/// groups were removed.
pub fn garbage_collection(
    list: &mut DeltaColumnGroupList,
    tsid: TabletSegmentId,
    min_readable_version: Version,
    tablet_path: &Path,
    clear_dcgs: &mut Vec<(TabletSegmentId, Version)>,
    clear_files: &mut Vec<PathBuf>,
) -> usize {
    let before = list.len();
    list.retain(|dcg| {
        if dcg.version() < min_readable_version {
            clear_dcgs.push((tsid, dcg.version()));
            clear_files.push(dcg.file_path(tablet_path));
            false
        } else {
            true
        }
    });
    before - list.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dcg(version: Version) -> DeltaColumnGroupPtr {
        Arc::new(DeltaColumnGroup::new(
            version,
            vec![1, 2],
            format!("{version}.cols"),
            10,
        ))
    }

    #[test]
    fn search_filters_newer_groups() {
        let list = vec![dcg(9), dcg(6), dcg(2)];
        let visible = search_by_version(&list, 6);
        let versions: Vec<_> = visible.iter().map(|d| d.version()).collect();
        assert_eq!(versions, vec![6, 2]);
        assert!(search_by_version(&list, 1).is_empty());
    }

    #[test]
    fn gc_reports_keys_and_files() {
        let tsid = TabletSegmentId::new(7, 3);
        let mut list = vec![dcg(9), dcg(6), dcg(2)];
        let mut keys = Vec::new();
        let mut files = Vec::new();

        let removed = garbage_collection(&mut list, tsid, 6, Path::new("/t/7"), &mut keys, &mut files);

        assert_eq!(removed, 1);
        assert_eq!(list.len(), 2);
        assert_eq!(keys, vec![(tsid, 2)]);
        assert_eq!(files, vec![PathBuf::from("/t/7/dcg/2.cols")]);
    }
}
