//! Record store operations on the staging and publication tiers.
//!
//! Every public operation acquires the store-wide filesystem lock, does its
//! work on the staging tier, and unwinds on failure by discarding
//! uncommitted changes and restoring `master`. Promotion into the
//! publication tier replays the record branch onto the publication `master`
//! and drops the branch on both sides.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;

use cairn_core::digest::is_token_hex;
use cairn_core::error::{CairnError, ContentErrorCode, Result};
use cairn_core::merkle::merkle_root;
use cairn_core::types::{
    File, MetadataStream, Record, RecordMetadata, RecordStatus, Token, TOKEN_SIZE,
};
use cairn_dag::MASTER;

use crate::content::{self, CookedFile};
use crate::db::CairnDb;

/// Filename of the per-record metadata document.
pub const RECORD_METADATA_FILENAME: &str = "recordmetadata.json";

/// Filename suffix for metadata streams; the stream id precedes it,
/// zero-padded to two digits.
pub const MD_FILENAME_SUFFIX: &str = ".metadata.txt";

/// Directory holding a record's payload files.
pub const PAYLOAD_DIR: &str = "payload";

fn md_stream_filename(id: u64) -> String {
    format!("{id:02}{MD_FILENAME_SUFFIX}")
}

fn record_metadata_path(root: &Path, id: &str) -> PathBuf {
    root.join(id).join(RECORD_METADATA_FILENAME)
}

/// Load a record's metadata document from `root/id`. A missing document
/// means the record does not exist in that tier.
pub(crate) fn load_record_metadata(root: &Path, id: &str) -> Result<RecordMetadata> {
    let data = match fs::read(record_metadata_path(root, id)) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(CairnError::RecordNotFound),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&data)
        .map_err(|e| CairnError::Corrupt(format!("undecodable record metadata for {id}: {e}")))
}

pub(crate) fn store_record_metadata(root: &Path, id: &str, md: &RecordMetadata) -> Result<()> {
    let data =
        serde_json::to_vec(md).map_err(|e| CairnError::Serialization(e.to_string()))?;
    Ok(fs::write(record_metadata_path(root, id), data)?)
}

/// Load all metadata streams of a record, ordered by stream id.
pub(crate) fn load_streams(root: &Path, id: &str) -> Result<Vec<MetadataStream>> {
    let mut streams = Vec::new();
    for entry in fs::read_dir(root.join(id))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(prefix) = name.strip_suffix(MD_FILENAME_SUFFIX) else {
            continue;
        };
        let stream_id: u64 = prefix.parse().map_err(|_| {
            CairnError::Corrupt(format!("bad metadata stream filename: {name}"))
        })?;
        let payload = fs::read_to_string(entry.path())?;
        streams.push(MetadataStream {
            id: stream_id,
            payload,
        });
    }
    streams.sort_by_key(|s| s.id);
    Ok(streams)
}

/// Load all payload files of a record in directory order.
pub(crate) fn load_files(root: &Path, id: &str) -> Result<Vec<File>> {
    let dir = root.join(id).join(PAYLOAD_DIR);
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            return Err(CairnError::Corrupt(format!(
                "record payload corrupt: {} holds a directory",
                dir.display()
            )));
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    names
        .iter()
        .map(|name| content::load_file(&dir.join(name)))
        .collect()
}

/// SHA-256 of every payload file of a record. An absent payload directory
/// means the update would leave the record without files.
fn payload_hashes(root: &Path, id: &str) -> Result<Vec<[u8; 32]>> {
    let dir = root.join(id).join(PAYLOAD_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(CairnError::content(ContentErrorCode::Empty, &[]))
        }
        Err(e) => return Err(e.into()),
    };
    let mut hashes = Vec::new();
    for entry in entries {
        let data = fs::read(entry?.path())?;
        hashes.push(cairn_core::digest::sha256(&data));
    }
    Ok(hashes)
}

impl CairnDb {
    /// Add a new record to the staging tier.
    ///
    /// Validates the submission, assigns a fresh random token, materializes
    /// the record on its own branch and commits it with status `Unvetted`.
    pub fn new_record(
        &self,
        streams: &[MetadataStream],
        files: &[File],
    ) -> Result<RecordMetadata> {
        let cooked = content::verify_content(streams, files, &[])?;

        let mut token: Token = [0u8; TOKEN_SIZE];
        OsRng.fill_bytes(&mut token);

        let _guard = self.lock_checked()?;
        self.staging.checkout(MASTER)?;
        self.staging.pull(true)?;

        let result = self.with_staging_unwind(|| self.create_record(&token, streams, &cooked));
        if result.is_err() {
            // The record branch may have been created before the failure.
            let id = hex::encode(token);
            if let Err(e) = self.staging.delete_branch(&id) {
                tracing::debug!("dropping {id}: {e}");
            }
        }
        result
    }

    /// Update an existing record on the staging tier.
    ///
    /// `files_add` may be empty for a metadata-only update. Returns
    /// `NoChanges` when the resulting tree is identical to the current one.
    pub fn update_record(
        &self,
        token: &[u8],
        md_append: &[MetadataStream],
        md_overwrite: &[MetadataStream],
        files_add: &[File],
        files_del: &[String],
    ) -> Result<RecordMetadata> {
        let all_md: Vec<MetadataStream> =
            md_append.iter().chain(md_overwrite).cloned().collect();
        let cooked = match content::verify_content(&all_md, files_add, files_del) {
            Ok(cooked) => cooked,
            Err(CairnError::ContentVerification {
                code: ContentErrorCode::Empty,
                ..
            }) => Vec::new(),
            Err(e) => return Err(e),
        };

        let _guard = self.lock_checked()?;
        self.staging.checkout(MASTER)?;
        self.staging.pull(true)?;

        let id = hex::encode(token);
        tracing::debug!("updating record {id}");
        let mut created_branch = false;
        let result = self.with_staging_unwind(|| {
            self.apply_record_update(
                &id,
                md_append,
                md_overwrite,
                &cooked,
                files_del,
                &mut created_branch,
            )
        });
        if result.is_err() && created_branch {
            // A vetted record gets a fresh branch off master here; without a
            // commit it must not survive the failure, or the record shows up
            // in both tiers. A pre-existing branch is an in-flight draft and
            // stays.
            if let Err(e) = self.staging.delete_branch(&id) {
                tracing::debug!("dropping {id}: {e}");
            }
        }
        result
    }

    /// Update metadata streams of a vetted record without touching its
    /// content. The change is made on a temporary staging branch and
    /// promoted into the publication tier.
    pub fn update_vetted_metadata(
        &self,
        token: &[u8],
        md_append: &[MetadataStream],
        md_overwrite: &[MetadataStream],
    ) -> Result<()> {
        let all_md: Vec<MetadataStream> =
            md_append.iter().chain(md_overwrite).cloned().collect();
        match content::verify_content(&all_md, &[], &[]) {
            Err(CairnError::ContentVerification {
                code: ContentErrorCode::Empty,
                ..
            }) => {}
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        let _guard = self.lock_checked()?;
        self.staging.checkout(MASTER)?;
        self.staging.pull(true)?;

        let id = hex::encode(token);
        let id_tmp = format!("{id}_tmp");

        if !self.staging.root().join(&id).is_dir() {
            return Err(CairnError::RecordNotFound);
        }
        let md = load_record_metadata(self.staging.root(), &id)?;
        if md.status == RecordStatus::Locked {
            return Err(CairnError::RecordLocked);
        }

        tracing::debug!("updating vetted metadata for {id}");
        let result = (|| {
            self.staging.new_branch(&id_tmp)?;
            self.update_metadata_streams(&id, md_append, md_overwrite)?;
            if !self.staging.diff()? {
                return Err(CairnError::NoChanges);
            }
            self.staging
                .commit(&format!("Update record metadata {id}"))?;
            self.rebase_promotion(&id_tmp)
        })();

        match result {
            Ok(()) => {
                self.staging.checkout(MASTER)?;
                Ok(())
            }
            Err(e) => {
                if let Err(stash_err) = self.staging.stash() {
                    tracing::error!("stash failed: {stash_err}");
                    return Err(stash_err);
                }
                self.staging.checkout(MASTER)?;
                if let Err(del_err) = self.staging.delete_branch(&id_tmp) {
                    // The branch never existed if new_branch itself failed.
                    tracing::debug!("dropping {id_tmp}: {del_err}");
                }
                Err(e)
            }
        }
    }

    /// Change the status of a staging-tier record.
    ///
    /// Publishing promotes the record branch into the publication tier;
    /// censoring commits the refusal but keeps the record in staging so it
    /// never enters the anchored public history. Returns the record without
    /// its files.
    pub fn set_unvetted_status(
        &self,
        token: &[u8],
        status: RecordStatus,
        md_append: &[MetadataStream],
        md_overwrite: &[MetadataStream],
    ) -> Result<Record> {
        let _guard = self.lock_checked()?;
        tracing::debug!("setting status {status} on {}", hex::encode(token));
        self.with_staging_unwind(|| {
            self.apply_status_change(token, status, md_append, md_overwrite)
        })
    }

    /// Fetch a record from the staging tier.
    pub fn get_unvetted(&self, token: &[u8]) -> Result<Record> {
        let _guard = self.lock_checked()?;
        self.get_record(token, true, true)
    }

    /// Fetch a record from the publication tier.
    pub fn get_vetted(&self, token: &[u8]) -> Result<Record> {
        let _guard = self.lock_checked()?;
        self.get_record(token, false, true)
    }

    /// Enumerate all records: publication-tier records from the repository
    /// directory listing, staging-tier records from the branch listing.
    pub fn inventory(&self, include_files: bool) -> Result<(Vec<Record>, Vec<Record>)> {
        let _guard = self.lock_checked()?;

        let mut vetted = Vec::new();
        for entry in fs::read_dir(self.publication.root())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_token_hex(&name) || !entry.path().is_dir() {
                continue;
            }
            let token = hex::decode(&name)
                .map_err(|e| CairnError::InvalidState(format!("bad token {name}: {e}")))?;
            vetted.push(self.get_record(&token, false, include_files)?);
        }

        let mut staging = Vec::new();
        for branch in self.staging.list_branches()? {
            if !is_token_hex(&branch) {
                continue;
            }
            let token = hex::decode(&branch)
                .map_err(|e| CairnError::InvalidState(format!("bad token {branch}: {e}")))?;
            staging.push(self.get_record(&token, true, include_files)?);
        }

        Ok((vetted, staging))
    }

    /// Run `op`, then restore the staging tier to `master`. On failure the
    /// uncommitted changes are discarded first; a failing discard is
    /// surfaced instead of the original error because the repository needs
    /// operator attention at that point.
    pub(crate) fn with_staging_unwind<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        match op() {
            Ok(v) => {
                self.staging.checkout(MASTER)?;
                Ok(v)
            }
            Err(CairnError::NoChanges) => {
                self.staging.checkout(MASTER)?;
                Err(CairnError::NoChanges)
            }
            Err(e) => {
                if let Err(stash_err) = self.staging.stash() {
                    tracing::error!("stash failed: {stash_err}");
                    return Err(stash_err);
                }
                self.staging.checkout(MASTER)?;
                Err(e)
            }
        }
    }

    fn create_record(
        &self,
        token: &Token,
        streams: &[MetadataStream],
        files: &[CookedFile],
    ) -> Result<RecordMetadata> {
        let id = hex::encode(token);
        self.staging.new_branch(&id)?;

        let payload_dir = self.staging.root().join(&id).join(PAYLOAD_DIR);
        fs::create_dir_all(&payload_dir)?;

        let mut hashes = Vec::with_capacity(files.len());
        for file in files {
            fs::write(payload_dir.join(&file.name), &file.payload)?;
            hashes.push(file.digest);
            self.staging
                .add(&Path::new(&id).join(PAYLOAD_DIR).join(&file.name))?;
        }

        for stream in streams {
            let filename = md_stream_filename(stream.id);
            fs::write(
                self.staging.root().join(&id).join(&filename),
                stream.payload.as_bytes(),
            )?;
            self.staging.add(&Path::new(&id).join(&filename))?;
        }

        let md = RecordMetadata {
            version: 1,
            status: RecordStatus::Unvetted,
            merkle: merkle_root(&hashes),
            timestamp: Utc::now().timestamp(),
            token: token.to_vec(),
        };
        store_record_metadata(self.staging.root(), &id, &md)?;
        self.staging
            .add(&Path::new(&id).join(RECORD_METADATA_FILENAME))?;

        self.staging.commit(&format!("Add record {id}"))?;
        Ok(md)
    }

    /// Check out the branch for `id`, creating it when the record exists on
    /// `master` but has no in-flight branch (an update of a vetted record).
    /// Returns whether the branch already existed.
    fn checkout_record_branch(&self, id: &str) -> Result<bool> {
        let exists = self
            .staging
            .list_branches()?
            .iter()
            .any(|b| is_token_hex(b) && b == id);

        if exists {
            if let Err(e) = self.staging.checkout(id) {
                tracing::debug!("record branch checkout failed: {e}");
                return Err(CairnError::RecordNotFound);
            }
            return Ok(true);
        }

        match fs::metadata(self.staging.root().join(id)) {
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CairnError::RecordNotFound),
            Err(e) => Err(e.into()),
            Ok(m) if !m.is_dir() => Err(CairnError::Corrupt(format!(
                "staging repository corrupt: {id} is not a directory"
            ))),
            Ok(_) => {
                self.staging.new_branch(id)?;
                Ok(false)
            }
        }
    }

    fn apply_record_update(
        &self,
        id: &str,
        md_append: &[MetadataStream],
        md_overwrite: &[MetadataStream],
        files_add: &[CookedFile],
        files_del: &[String],
        created_branch: &mut bool,
    ) -> Result<RecordMetadata> {
        *created_branch = !self.checkout_record_branch(id)?;

        let md = load_record_metadata(self.staging.root(), id)?;
        match md.status {
            RecordStatus::Unvetted
            | RecordStatus::UnvettedIteration
            | RecordStatus::Vetted => {}
            RecordStatus::Locked => return Err(CairnError::RecordLocked),
            from => {
                return Err(CairnError::StateTransition {
                    from,
                    to: RecordStatus::UnvettedIteration,
                })
            }
        }

        // Verify all deletions before touching anything.
        for name in files_del {
            let path = self.staging.root().join(id).join(PAYLOAD_DIR).join(name);
            match fs::metadata(&path) {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(CairnError::content(
                        ContentErrorCode::FileNotFound,
                        &[name],
                    ))
                }
                Err(e) => return Err(e.into()),
                Ok(m) if !m.is_file() => {
                    return Err(CairnError::Corrupt(format!("not a regular file: {name}")))
                }
                Ok(_) => {}
            }
        }

        let payload_dir = self.staging.root().join(id).join(PAYLOAD_DIR);
        fs::create_dir_all(&payload_dir)?;
        for file in files_add {
            fs::write(payload_dir.join(&file.name), &file.payload)?;
            self.staging
                .add(&Path::new(id).join(PAYLOAD_DIR).join(&file.name))?;
        }
        for name in files_del {
            self.staging
                .remove(&Path::new(id).join(PAYLOAD_DIR).join(name))?;
        }

        self.update_metadata_streams(id, md_append, md_overwrite)?;

        let hashes = payload_hashes(self.staging.root(), id)?;

        if !self.staging.diff()? {
            return Err(CairnError::NoChanges);
        }

        let new_md = RecordMetadata {
            version: md.version + 1,
            status: RecordStatus::UnvettedIteration,
            merkle: merkle_root(&hashes),
            timestamp: Utc::now().timestamp(),
            token: md.token.clone(),
        };
        store_record_metadata(self.staging.root(), id, &new_md)?;
        self.staging
            .add(&Path::new(id).join(RECORD_METADATA_FILENAME))?;

        self.staging.commit(&format!("Update record {id}"))?;
        Ok(new_md)
    }

    fn apply_status_change(
        &self,
        token: &[u8],
        status: RecordStatus,
        md_append: &[MetadataStream],
        md_overwrite: &[MetadataStream],
    ) -> Result<Record> {
        let id = hex::encode(token);
        if self.staging.checkout(&id).is_err() {
            return Err(CairnError::RecordNotFound);
        }

        let staging_root = self.staging.root().to_path_buf();
        let mut record = self.load_record(&id, &staging_root, false)?;
        let from = record.metadata.status;

        match (from, status) {
            (
                RecordStatus::Unvetted | RecordStatus::UnvettedIteration,
                RecordStatus::Vetted,
            ) => {
                record.metadata.status = RecordStatus::Vetted;
                record.metadata.version += 1;
                record.metadata.timestamp = Utc::now().timestamp();
                store_record_metadata(self.staging.root(), &id, &record.metadata)?;
                self.update_metadata_streams(&id, md_append, md_overwrite)?;
                self.commit_record_metadata(&id, "published")?;
                self.rebase_promotion(&id)?;
            }
            (RecordStatus::Unvetted, RecordStatus::Censored) => {
                record.metadata.status = RecordStatus::Censored;
                record.metadata.version += 1;
                record.metadata.timestamp = Utc::now().timestamp();
                store_record_metadata(self.staging.root(), &id, &record.metadata)?;
                self.update_metadata_streams(&id, md_append, md_overwrite)?;
                self.commit_record_metadata(&id, "censored")?;
            }
            (from, to) => return Err(CairnError::StateTransition { from, to }),
        }

        Ok(record)
    }

    /// Promote branch `id` into the publication tier and drop it on both
    /// sides. The publication `master` only moves when the replay succeeds.
    fn rebase_promotion(&self, id: &str) -> Result<()> {
        self.staging.checkout(MASTER)?;
        self.staging.pull(true)?;
        if self.staging.checkout(id).is_err() {
            return Err(CairnError::RecordNotFound);
        }
        self.staging.rebase(MASTER)?;
        self.staging.push("origin", id, true)?;

        self.publication.rebase(id)?;
        self.publication.delete_branch(id)?;

        self.staging.checkout(MASTER)?;
        self.staging.pull(true)?;
        self.staging.delete_branch(id)
    }

    fn update_metadata_streams(
        &self,
        id: &str,
        md_append: &[MetadataStream],
        md_overwrite: &[MetadataStream],
    ) -> Result<()> {
        for stream in md_overwrite {
            let filename = md_stream_filename(stream.id);
            fs::write(
                self.staging.root().join(id).join(&filename),
                stream.payload.as_bytes(),
            )?;
            self.staging.add(&Path::new(id).join(&filename))?;
        }
        for stream in md_append {
            let filename = md_stream_filename(stream.id);
            let path = self.staging.root().join(id).join(&filename);
            let mut payload = match fs::read_to_string(&path) {
                Ok(existing) => existing,
                Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e.into()),
            };
            payload.push_str(&stream.payload);
            fs::write(&path, payload.as_bytes())?;
            self.staging.add(&Path::new(id).join(&filename))?;
        }
        Ok(())
    }

    fn commit_record_metadata(&self, id: &str, reason: &str) -> Result<()> {
        self.staging
            .add(&Path::new(id).join(RECORD_METADATA_FILENAME))?;
        self.staging
            .commit(&format!("Update record status {id} {reason}"))?;
        Ok(())
    }

    /// Fetch a record from one tier. Staging reads check out the record
    /// branch and restore `master` afterwards; publication reads come
    /// straight off `master`.
    pub(crate) fn get_record(
        &self,
        token: &[u8],
        staging: bool,
        include_files: bool,
    ) -> Result<Record> {
        let id = hex::encode(token);
        if staging {
            if self.staging.checkout(&id).is_err() {
                return Err(CairnError::RecordNotFound);
            }
            match self.staging.current_branch() {
                Ok(branch) if branch == id => {}
                _ => return Err(CairnError::RecordNotFound),
            }
            let staging_root = self.staging.root().to_path_buf();
            let result = self.load_record(&id, &staging_root, include_files);
            if let Err(e) = self.staging.checkout(MASTER) {
                tracing::error!("could not restore master: {e}");
            }
            result
        } else {
            let publication_root = self.publication.root().to_path_buf();
            self.load_record(&id, &publication_root, include_files)
        }
    }

    fn load_record(&self, id: &str, root: &Path, include_files: bool) -> Result<Record> {
        let metadata = load_record_metadata(root, id)?;
        let streams = load_streams(root, id)?;
        let files = if include_files {
            load_files(root, id)?
        } else {
            Vec::new()
        };
        Ok(Record {
            metadata,
            streams,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md_stream_filename_zero_padded() {
        assert_eq!(md_stream_filename(1), "01.metadata.txt");
        assert_eq!(md_stream_filename(12), "12.metadata.txt");
    }

    #[test]
    fn test_stream_filename_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let id = "aa".repeat(32);
        fs::create_dir_all(dir.path().join(&id)).unwrap();
        fs::write(
            dir.path().join(&id).join(md_stream_filename(2)),
            b"stream two",
        )
        .unwrap();
        fs::write(
            dir.path().join(&id).join(md_stream_filename(10)),
            b"stream ten",
        )
        .unwrap();
        // Unrelated files are skipped.
        fs::write(dir.path().join(&id).join("recordmetadata.json"), b"{}").unwrap();

        let streams = load_streams(dir.path(), &id).unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].id, 2);
        assert_eq!(streams[0].payload, "stream two");
        assert_eq!(streams[1].id, 10);
    }

    #[test]
    fn test_load_record_metadata_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_record_metadata(dir.path(), &"ab".repeat(32)).unwrap_err();
        assert!(matches!(err, CairnError::RecordNotFound));
    }
}
