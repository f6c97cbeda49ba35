//! Atomic fragment blob store
//!
//! One file per `(object, index)` under `<datadir>/<object_id>/<index>.bin`.
//! Writes land in `<index>.bin.tmp`, are fsynced, then renamed into place, so
//! a crash leaves either the old fragment or the new one, never a torn file.
//! Fragments are write-once: a re-put with identical bytes is a no-op and a
//! re-put with different bytes is dropped (callers have already verified the
//! content against the object's cross-checksum).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use strand_core::{FragmentIndex, ObjectId, Result, StrandError};

/// On-disk fragment storage rooted at the configured data directory
pub struct FragmentStore {
    root: PathBuf,
}

impl FragmentStore {
    /// Open the store, creating the root directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_dir(&self, object: &ObjectId) -> PathBuf {
        self.root.join(object.as_str())
    }

    fn fragment_path(&self, object: &ObjectId, index: FragmentIndex) -> PathBuf {
        self.object_dir(object).join(format!("{}.bin", index))
    }

    /// Persist a fragment atomically
    pub fn put(&self, object: &ObjectId, index: FragmentIndex, bytes: &[u8]) -> Result<()> {
        let path = self.fragment_path(object, index);

        if path.exists() {
            let existing = fs::read(&path)?;
            if existing != bytes {
                tracing::warn!(
                    "fragment {}/{} already present with different content, keeping original",
                    object,
                    index
                );
            }
            return Ok(());
        }

        fs::create_dir_all(self.object_dir(object))?;

        let tmp = path.with_extension("bin.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read a fragment back
    pub fn get(&self, object: &ObjectId, index: FragmentIndex) -> Result<Vec<u8>> {
        match fs::read(self.fragment_path(object, index)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StrandError::NotFound {
                object: object.to_string(),
                index,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every fragment of an object
    pub fn delete(&self, object: &ObjectId) -> Result<()> {
        match fs::remove_dir_all(self.object_dir(object)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FragmentStore, ObjectId) {
        let dir = TempDir::new().unwrap();
        let store = FragmentStore::new(dir.path().join("fragments")).unwrap();
        let object = ObjectId::new("test-object").unwrap();
        (dir, store, object)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store, object) = store();

        store.put(&object, 0, b"fragment body").unwrap();
        assert_eq!(store.get(&object, 0).unwrap(), b"fragment body");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store, object) = store();

        assert!(matches!(
            store.get(&object, 7),
            Err(StrandError::NotFound { index: 7, .. })
        ));
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let (dir, store, object) = store();

        store.put(&object, 0, b"bytes").unwrap();

        let tmp = dir
            .path()
            .join("fragments")
            .join(object.as_str())
            .join("0.bin.tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn test_identical_reput_is_noop() {
        let (_dir, store, object) = store();

        store.put(&object, 0, b"same").unwrap();
        store.put(&object, 0, b"same").unwrap();
        assert_eq!(store.get(&object, 0).unwrap(), b"same");
    }

    #[test]
    fn test_conflicting_reput_keeps_original() {
        let (_dir, store, object) = store();

        store.put(&object, 0, b"original").unwrap();
        store.put(&object, 0, b"imposter").unwrap();
        assert_eq!(store.get(&object, 0).unwrap(), b"original");
    }

    #[test]
    fn test_delete_removes_all_fragments() {
        let (_dir, store, object) = store();

        store.put(&object, 0, b"zero").unwrap();
        store.put(&object, 1, b"one").unwrap();
        store.delete(&object).unwrap();

        assert!(store.get(&object, 0).is_err());
        assert!(store.get(&object, 1).is_err());

        // Deleting an absent object is fine
        store.delete(&object).unwrap();
    }
}
