/// Key prefix for persisted delete vectors.
pub const DEL_VECTOR_PREFIX: u8 = b'D';

/// Key prefix for persisted delta column groups.
pub const DELTA_COLUMN_GROUP_PREFIX: u8 = b'C';

/// Prefix byte + tablet id (u64 BE).
pub const TABLET_KEY_PREFIX_LEN: usize = 1 + 8;

/// Tablet prefix + segment id (u32 BE).
pub const SEGMENT_KEY_PREFIX_LEN: usize = TABLET_KEY_PREFIX_LEN + 4;

/// Segment prefix + version (u64 BE).
pub const META_KEY_LEN: usize = SEGMENT_KEY_PREFIX_LEN + 8;

/// Directory (relative to the tablet path) holding delta column group files.
pub const DELTA_COLUMN_GROUP_DIR: &str = "dcg";
