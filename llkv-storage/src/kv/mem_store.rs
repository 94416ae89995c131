use super::*;
use llkv_result::Error;
use std::collections::BTreeMap;
use std::io;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory ordered store used for tests and embedded setups.
///
/// A batch is applied under a single write lock, which makes it atomic with
/// respect to every reader.
#[allow(clippy::module_name_repetitions)]
#[derive(Default)]
pub struct MemKvStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write_batch` fail with an I/O error (or succeed
    /// again when `fail` is false). Nothing from a failed batch is applied.
    pub fn inject_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("MemKvStore entries read lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemKvStore {
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self
            .entries
            .read()
            .expect("MemKvStore entries read lock poisoned");
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(Error::Io(io::Error::other("injected write failure")));
        }
        let mut map = self
            .entries
            .write()
            .expect("MemKvStore entries write lock poisoned");
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, bytes } => {
                    map.insert(key.clone(), bytes.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
        Ok(())
    }
}
