use std::fmt;

/// Identifier of a tablet (a shard of a table).
pub type TabletId = u64;

/// Segment identifier within a tablet. For rowsets this is the rowset segment id
/// ("rssid"): the rowset's base id plus the segment's position inside it.
pub type SegmentId = u32;

/// Commit version of a tablet. `Version::MAX` reads the latest state.
pub type Version = u64;

/// Identifier of a rowset (the unit committed by one ingestion).
pub type RowsetId = u64;

/// Cache key addressing one segment of one tablet.
///
/// Ordering is `(tablet_id, segment_id)`, so all segments of a tablet form a
/// contiguous range in ordered maps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TabletSegmentId {
    pub tablet_id: TabletId,
    pub segment_id: SegmentId,
}

impl TabletSegmentId {
    #[inline]
    pub const fn new(tablet_id: TabletId, segment_id: SegmentId) -> Self {
        Self {
            tablet_id,
            segment_id,
        }
    }

    /// First key of `tablet_id` in `(tablet_id, segment_id)` order.
    #[inline]
    pub const fn tablet_start(tablet_id: TabletId) -> Self {
        Self::new(tablet_id, 0)
    }
}

impl fmt::Display for TabletSegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tablet_id, self.segment_id)
    }
}
