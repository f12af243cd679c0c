//! Commit objects and the content-addressed object store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cairn_core::digest::{sha256, COMMIT_DIGEST_SIZE};
use cairn_core::error::{CairnError, Result};

/// A commit: a snapshot of the working tree plus provenance.
///
/// The `tree` maps repository-relative paths (forward slashes) to the hex
/// SHA-256 of the blob at that path. The commit id is the first 20 bytes of
/// the SHA-256 over the canonical JSON encoding, which is deterministic
/// because `tree` is an ordered map and the field order is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Hex id of the parent commit; `None` only for a repository's root
    /// commit.
    pub parent: Option<String>,
    /// First line of the commit message.
    pub subject: String,
    /// Remainder of the commit message.
    pub body: String,
    /// Unix timestamp; preserved across rebase replay.
    pub time: i64,
    /// Path -> blob digest (hex).
    pub tree: BTreeMap<String, String>,
}

impl Commit {
    /// Canonical encoding used for hashing and storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CairnError::Serialization(e.to_string()))
    }

    /// The commit id of this object.
    pub fn id(&self) -> Result<[u8; COMMIT_DIGEST_SIZE]> {
        let digest = sha256(&self.encode()?);
        let mut id = [0u8; COMMIT_DIGEST_SIZE];
        id.copy_from_slice(&digest[..COMMIT_DIGEST_SIZE]);
        Ok(id)
    }
}

/// Flat content-addressed object directory.
///
/// Blob keys are 64 hex characters (SHA-256), commit keys are 40 (20-byte
/// commit id); the lengths never collide.
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.object_path(key).exists()
    }

    /// Store a blob, returning its hex SHA-256 key. Already-present blobs
    /// are left untouched.
    pub fn put_blob(&self, data: &[u8]) -> Result<String> {
        let key = hex::encode(sha256(data));
        let path = self.object_path(&key);
        if !path.exists() {
            fs::write(&path, data)?;
        }
        Ok(key)
    }

    pub fn get_blob(&self, key: &str) -> Result<Vec<u8>> {
        fs::read(self.object_path(key))
            .map_err(|_| CairnError::Repo(format!("missing blob object: {key}")))
    }

    /// Store a commit object, returning its hex id.
    pub fn put_commit(&self, commit: &Commit) -> Result<String> {
        let key = hex::encode(commit.id()?);
        let path = self.object_path(&key);
        if !path.exists() {
            fs::write(&path, commit.encode()?)?;
        }
        Ok(key)
    }

    pub fn get_commit(&self, key: &str) -> Result<Commit> {
        let data = fs::read(self.object_path(key))
            .map_err(|_| CairnError::Repo(format!("missing commit object: {key}")))?;
        serde_json::from_slice(&data).map_err(|e| {
            CairnError::Corrupt(format!("undecodable commit object {key}: {e}"))
        })
    }

    /// Copy a single object file into another store if absent there.
    pub fn copy_object_to(&self, key: &str, other: &ObjectStore) -> Result<()> {
        let dst = other.object_path(key);
        if !dst.exists() {
            fs::copy(self.object_path(key), dst)?;
        }
        Ok(())
    }

    /// Verify that the object stored under `key` hashes back to `key`.
    pub fn verify(&self, key: &str) -> Result<()> {
        let data = fs::read(self.object_path(key))
            .map_err(|_| CairnError::Corrupt(format!("missing object: {key}")))?;
        let ok = match key.len() {
            // Blob: keyed by full SHA-256.
            64 => hex::encode(sha256(&data)) == key,
            // Commit: keyed by the truncated digest of the encoding.
            40 => hex::encode(&sha256(&data)[..COMMIT_DIGEST_SIZE]) == key,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CairnError::Corrupt(format!("object hash mismatch: {key}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (ObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (ObjectStore::new(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn test_blob_roundtrip() {
        let (store, _dir) = store();
        let key = store.put_blob(b"payload").unwrap();
        assert_eq!(store.get_blob(&key).unwrap(), b"payload");
        store.verify(&key).unwrap();
    }

    #[test]
    fn test_commit_id_is_deterministic() {
        let commit = Commit {
            parent: None,
            subject: "Initialize repository".into(),
            body: String::new(),
            time: 1700000000,
            tree: BTreeMap::new(),
        };
        assert_eq!(commit.id().unwrap(), commit.clone().id().unwrap());

        let mut other = commit.clone();
        other.subject = "something else".into();
        assert_ne!(commit.id().unwrap(), other.id().unwrap());
    }

    #[test]
    fn test_commit_roundtrip_and_verify() {
        let (store, _dir) = store();
        let mut tree = BTreeMap::new();
        tree.insert("a.txt".to_string(), hex::encode(sha256(b"a")));
        let commit = Commit {
            parent: None,
            subject: "Add record".into(),
            body: "details".into(),
            time: 1700000000,
            tree,
        };
        let key = store.put_commit(&commit).unwrap();
        assert_eq!(store.get_commit(&key).unwrap(), commit);
        store.verify(&key).unwrap();
    }

    #[test]
    fn test_verify_detects_tampering() {
        let (store, _dir) = store();
        let key = store.put_blob(b"original").unwrap();
        fs::write(store.dir().join(&key), b"tampered").unwrap();
        assert!(store.verify(&key).is_err());
    }
}
