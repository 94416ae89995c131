//! Versioned delete vectors.
//!
//! A [`DelVector`] records which row ordinals of one segment are logically
//! deleted as of a version. Instances are immutable once built; applying new
//! deletes produces a fresh vector at a higher version.

use crate::types::Version;
use llkv_result::{Error, Result};
use roaring::RoaringBitmap;
use std::sync::Arc;

pub type DelVectorPtr = Arc<DelVector>;

const VERSION_HEADER_LEN: usize = 8;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DelVector {
    version: Version,
    deletes: RoaringBitmap,
}

impl DelVector {
    /// Empty vector at `version`.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            deletes: RoaringBitmap::new(),
        }
    }

    pub fn from_ordinals<I>(version: Version, ordinals: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self {
            version,
            deletes: ordinals.into_iter().collect(),
        }
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn cardinality(&self) -> u64 {
        self.deletes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty()
    }

    #[inline]
    pub fn contains(&self, ordinal: u32) -> bool {
        self.deletes.contains(ordinal)
    }

    #[inline]
    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.deletes
    }

    /// Copy of this vector with `dels` added, stamped with `version`.
    pub fn add_dels_as_new_version(&self, dels: &[u32], version: Version) -> Self {
        let mut deletes = self.deletes.clone();
        deletes.extend(dels.iter().copied());
        Self { version, deletes }
    }

    /// Approximate heap + inline footprint, used for cache accounting.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.deletes.serialized_size()
    }

    /// `[version: u64 LE][portable roaring bitmap]`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(VERSION_HEADER_LEN + self.deletes.serialized_size());
        out.extend_from_slice(&self.version.to_le_bytes());
        self.deletes.serialize_into(&mut out)?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VERSION_HEADER_LEN {
            return Err(Error::corruption(format!(
                "delete vector blob too short: {} bytes",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(VERSION_HEADER_LEN);
        let mut version = [0u8; VERSION_HEADER_LEN];
        version.copy_from_slice(header);
        let deletes = RoaringBitmap::deserialize_from(body)
            .map_err(|e| Error::corruption(format!("delete vector bitmap: {e}")))?;
        Ok(Self {
            version: Version::from_le_bytes(version),
            deletes,
        })
    }
}
