//! Bucketed durable KV store
//!
//! RocksDB with one column family per bucket. Multi-key updates go through
//! a single `WriteBatch` so readers never observe a torn update; prefix
//! deletes implement whole-object teardown for the GC.

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use strand_core::{ObjectId, PeerId, Result, StrandError};

/// Pinned cross-checksums: ObjectId → serialized FPCC
pub const CF_FPCCS: &str = "fpccs";
/// Echo evidence: ObjectId ++ NUL ++ PeerId → 1
pub const CF_ECHO_SEEN: &str = "echo_seen";
/// Ready evidence: ObjectId ++ NUL ++ PeerId → 1
pub const CF_READY_SEEN: &str = "ready_seen";
/// Object metadata: ObjectId → serialized [`ObjectMeta`]
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 4] = [CF_FPCCS, CF_ECHO_SEEN, CF_READY_SEEN, CF_META];

/// Evidence keys are `object ++ 0x00 ++ peer`; object ids never contain NUL,
/// so prefix scans over one object stay exact.
const KEY_SEPARATOR: u8 = 0x00;

/// Per-object metadata record persisted in the `meta` bucket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// First-Disperse wall clock, unix milliseconds; anchors the GC TTL
    pub created_at_ms: i64,

    /// Original blob length before padding
    pub blob_len: u64,
}

impl ObjectMeta {
    /// Serialize for the `meta` bucket
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("meta serialization is infallible")
    }

    /// Deserialize from the `meta` bucket
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| StrandError::Serialization(e.to_string()))
    }
}

/// Durable KV store over RocksDB column families
pub struct KvStore {
    db: Arc<DB>,
}

impl KvStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| StrandError::StorageError(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StrandError::StorageError(format!("missing column family {}", name)))
    }

    /// Composite key for echo/ready evidence
    pub fn evidence_key(object: &ObjectId, peer: &PeerId) -> Vec<u8> {
        let mut key = Vec::with_capacity(object.as_bytes().len() + 1 + peer.len());
        key.extend_from_slice(object.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(peer.as_bytes());
        key
    }

    /// Prefix covering all evidence keys of one object
    pub fn evidence_prefix(object: &ObjectId) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(object.as_bytes().len() + 1);
        prefix.extend_from_slice(object.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    /// Store one key/value pair
    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(cf)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StrandError::StorageError(e.to_string()))
    }

    /// Fetch a value
    pub fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StrandError::StorageError(e.to_string()))
    }

    /// Delete one key
    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf(cf)?;
        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StrandError::StorageError(e.to_string()))
    }

    /// Apply many puts in one transaction
    pub fn write_batch(&self, puts: &[(String, Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (cf, key, value) in puts {
            let cf = self.cf(cf)?;
            batch.put_cf(&cf, key, value);
        }
        self.db
            .write(batch)
            .map_err(|e| StrandError::StorageError(e.to_string()))
    }

    /// Delete every key starting with `prefix` in one transaction
    pub fn delete_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let mut batch = WriteBatch::default();

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(|e| StrandError::StorageError(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            batch.delete_cf(&cf, key);
        }

        self.db
            .write(batch)
            .map_err(|e| StrandError::StorageError(e.to_string()))
    }

    /// Keys starting with `prefix`, for restart warm-up
    pub fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| StrandError::StorageError(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// All key/value pairs of a bucket, for restart warm-up and GC scans
    pub fn scan(&self, cf_name: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StrandError::StorageError(e.to_string()))?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, KvStore) {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path().join("kv")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, store) = open_store();

        store.put(CF_FPCCS, b"obj", b"checksum").unwrap();
        assert_eq!(
            store.get(CF_FPCCS, b"obj").unwrap(),
            Some(b"checksum".to_vec())
        );

        store.delete(CF_FPCCS, b"obj").unwrap();
        assert_eq!(store.get(CF_FPCCS, b"obj").unwrap(), None);
    }

    #[test]
    fn test_buckets_are_isolated() {
        let (_dir, store) = open_store();

        store.put(CF_ECHO_SEEN, b"key", b"1").unwrap();
        assert_eq!(store.get(CF_READY_SEEN, b"key").unwrap(), None);
    }

    #[test]
    fn test_write_batch() {
        let (_dir, store) = open_store();

        store
            .write_batch(&[
                (CF_ECHO_SEEN.to_string(), b"a".to_vec(), b"1".to_vec()),
                (CF_READY_SEEN.to_string(), b"b".to_vec(), b"1".to_vec()),
            ])
            .unwrap();

        assert_eq!(store.get(CF_ECHO_SEEN, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(CF_READY_SEEN, b"b").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_delete_prefix_is_exact() {
        let (_dir, store) = open_store();

        let obj = ObjectId::new("obj").unwrap();
        let sibling = ObjectId::new("obj2").unwrap();

        let peers = ["n1:7001".to_string(), "n2:7002".to_string()];
        for peer in &peers {
            store
                .put(CF_ECHO_SEEN, &KvStore::evidence_key(&obj, peer), b"1")
                .unwrap();
            store
                .put(CF_ECHO_SEEN, &KvStore::evidence_key(&sibling, peer), b"1")
                .unwrap();
        }

        store
            .delete_prefix(CF_ECHO_SEEN, &KvStore::evidence_prefix(&obj))
            .unwrap();

        // "obj" is gone, the sibling "obj2" untouched
        for peer in &peers {
            assert_eq!(
                store
                    .get(CF_ECHO_SEEN, &KvStore::evidence_key(&obj, peer))
                    .unwrap(),
                None
            );
            assert!(store
                .get(CF_ECHO_SEEN, &KvStore::evidence_key(&sibling, peer))
                .unwrap()
                .is_some());
        }
    }

    #[test]
    fn test_scan() {
        let (_dir, store) = open_store();

        store.put(CF_META, b"a", b"1").unwrap();
        store.put(CF_META, b"b", b"2").unwrap();

        let entries = store.scan(CF_META).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv");

        {
            let store = KvStore::open(&path).unwrap();
            store.put(CF_META, b"obj", b"meta").unwrap();
        }

        let store = KvStore::open(&path).unwrap();
        assert_eq!(store.get(CF_META, b"obj").unwrap(), Some(b"meta".to_vec()));
    }

    #[test]
    fn test_object_meta_roundtrip() {
        let meta = ObjectMeta {
            created_at_ms: 1_700_000_000_000,
            blob_len: 43,
        };
        assert_eq!(ObjectMeta::from_bytes(&meta.to_bytes()).unwrap(), meta);
    }
}
