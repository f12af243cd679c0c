//! The repository engine.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cairn_core::digest::COMMIT_DIGEST_SIZE;
use cairn_core::error::{CairnError, Result};
use cairn_core::traits::{LogEntry, RepoEngine};

use crate::object::{Commit, ObjectStore};

const DAG_DIR: &str = ".dag";
const OBJECTS_DIR: &str = "objects";
const REFS_DIR: &str = "refs";
const HEAD_FILE: &str = "HEAD";
const CONFIG_FILE: &str = "config.json";

/// Default branch name; the authoritative history on the publication tier.
pub const MASTER: &str = "master";

/// Repository settings plus the origin recorded at clone time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RepoConfig {
    settings: BTreeMap<String, String>,
    origin: Option<PathBuf>,
}

/// An opened repository: a working tree plus the `.dag/` engine state.
///
/// All state lives on disk, so a `DagRepo` is a stateless handle and two
/// handles over the same directory observe each other's writes. Callers
/// serialize access through the store-wide filesystem lock.
pub struct DagRepo {
    root: PathBuf,
    objects: ObjectStore,
}

impl DagRepo {
    /// Create a new repository at `root` with an empty root commit on
    /// `master`, recording `settings` in the repository config.
    pub fn init<P: AsRef<Path>>(root: P, settings: BTreeMap<String, String>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let dag = root.join(DAG_DIR);
        if dag.exists() {
            return Err(CairnError::Repo(format!(
                "repository already exists: {}",
                root.display()
            )));
        }
        fs::create_dir_all(dag.join(OBJECTS_DIR))?;
        fs::create_dir_all(dag.join(REFS_DIR))?;

        let repo = Self::handle(root);
        repo.write_config(&RepoConfig {
            settings,
            origin: None,
        })?;

        let root_commit = Commit {
            parent: None,
            subject: "Initialize repository".to_string(),
            body: String::new(),
            time: Utc::now().timestamp(),
            tree: BTreeMap::new(),
        };
        let id = repo.objects.put_commit(&root_commit)?;
        repo.write_ref(MASTER, &id)?;
        repo.set_head(MASTER)?;

        tracing::debug!("initialized repository at {}", repo.root.display());
        Ok(repo)
    }

    /// Whether `root` already holds a repository.
    pub fn is_repo<P: AsRef<Path>>(root: P) -> bool {
        root.as_ref().join(DAG_DIR).join(HEAD_FILE).exists()
    }

    /// Open an existing repository.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.join(DAG_DIR).join(HEAD_FILE).exists() {
            return Err(CairnError::Repo(format!(
                "not a repository: {}",
                root.display()
            )));
        }
        Ok(Self::handle(root))
    }

    /// Clone `src` into `dst`, recording `src` as the clone's origin, and
    /// materialize `master` in the new working tree.
    pub fn clone_from<P: AsRef<Path>>(
        src: &DagRepo,
        dst: P,
        settings: BTreeMap<String, String>,
    ) -> Result<Self> {
        let dst = dst.as_ref().to_path_buf();
        let dag = dst.join(DAG_DIR);
        if dag.exists() {
            return Err(CairnError::Repo(format!(
                "repository already exists: {}",
                dst.display()
            )));
        }
        fs::create_dir_all(dag.join(OBJECTS_DIR))?;
        fs::create_dir_all(dag.join(REFS_DIR))?;

        let repo = Self::handle(dst);
        repo.write_config(&RepoConfig {
            settings,
            origin: Some(src.root.clone()),
        })?;

        // Copy every object and ref wholesale.
        for entry in fs::read_dir(src.objects.dir())? {
            let entry = entry?;
            let name = entry.file_name();
            fs::copy(entry.path(), repo.objects.dir().join(&name))?;
        }
        for branch in src.list_branches()? {
            let id = src.read_ref(&branch)?;
            repo.write_ref(&branch, &id)?;
        }

        repo.set_head(MASTER)?;
        let head = repo.read_ref(MASTER)?;
        let tree = repo.objects.get_commit(&head)?.tree;
        repo.materialize(&tree)?;

        tracing::debug!(
            "cloned {} into {}",
            src.root.display(),
            repo.root.display()
        );
        Ok(repo)
    }

    fn handle(root: PathBuf) -> Self {
        let objects = ObjectStore::new(root.join(DAG_DIR).join(OBJECTS_DIR));
        Self { root, objects }
    }

    fn dag_path(&self, name: &str) -> PathBuf {
        self.root.join(DAG_DIR).join(name)
    }

    fn ref_path(&self, branch: &str) -> PathBuf {
        self.dag_path(REFS_DIR).join(branch)
    }

    fn read_ref(&self, branch: &str) -> Result<String> {
        fs::read_to_string(self.ref_path(branch))
            .map(|s| s.trim().to_string())
            .map_err(|_| CairnError::Repo(format!("unknown branch: {branch}")))
    }

    fn write_ref(&self, branch: &str, id: &str) -> Result<()> {
        Ok(fs::write(self.ref_path(branch), id)?)
    }

    fn set_head(&self, branch: &str) -> Result<()> {
        Ok(fs::write(self.dag_path(HEAD_FILE), branch)?)
    }

    fn read_config(&self) -> Result<RepoConfig> {
        let data = fs::read(self.dag_path(CONFIG_FILE))?;
        serde_json::from_slice(&data)
            .map_err(|e| CairnError::Corrupt(format!("undecodable repo config: {e}")))
    }

    fn write_config(&self, config: &RepoConfig) -> Result<()> {
        let data = serde_json::to_vec_pretty(config)
            .map_err(|e| CairnError::Serialization(e.to_string()))?;
        Ok(fs::write(self.dag_path(CONFIG_FILE), data)?)
    }

    /// A configured setting, e.g. `core.autocrlf`.
    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_config()?.settings.get(key).cloned())
    }

    fn origin(&self) -> Result<DagRepo> {
        let config = self.read_config()?;
        let path = config
            .origin
            .ok_or_else(|| CairnError::Repo("repository has no origin".to_string()))?;
        DagRepo::open(path)
    }

    fn head_commit_id(&self) -> Result<String> {
        let branch = self.head_branch()?;
        self.read_ref(&branch)
    }

    fn head_branch(&self) -> Result<String> {
        fs::read_to_string(self.dag_path(HEAD_FILE))
            .map(|s| s.trim().to_string())
            .map_err(|e| CairnError::Repo(format!("unreadable HEAD: {e}")))
    }

    fn reject_escape(&self, path: &Path) -> Result<()> {
        let bad = path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir) || c.as_os_str() == DAG_DIR);
        if bad {
            return Err(CairnError::Repo(format!(
                "path outside working tree: {}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Path -> file location for every file in the working tree.
    fn worktree_files(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut out = BTreeMap::new();
        self.walk(&self.root.clone(), "", &mut out)?;
        Ok(out)
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut BTreeMap<String, PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if prefix.is_empty() && name == DAG_DIR {
                continue;
            }
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, &rel, out)?;
            } else {
                out.insert(rel, path);
            }
        }
        Ok(())
    }

    /// Hash the working tree without storing blobs.
    fn worktree_manifest(&self) -> Result<BTreeMap<String, String>> {
        let mut manifest = BTreeMap::new();
        for (rel, path) in self.worktree_files()? {
            let data = fs::read(&path)?;
            manifest.insert(rel, hex::encode(cairn_core::digest::sha256(&data)));
        }
        Ok(manifest)
    }

    /// Replace the working tree with `tree`.
    fn materialize(&self, tree: &BTreeMap<String, String>) -> Result<()> {
        self.clear_worktree()?;
        for (rel, blob) in tree {
            let path = self.root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, self.objects.get_blob(blob)?)?;
        }
        Ok(())
    }

    fn clear_worktree(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy() == DAG_DIR {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let mut cur = Some(descendant.to_string());
        while let Some(id) = cur {
            if id == ancestor {
                return Ok(true);
            }
            cur = self.objects.get_commit(&id)?.parent;
        }
        Ok(false)
    }

    /// Copy every object reachable from `head` in `src` into `self`.
    fn fetch_reachable(&self, src: &DagRepo, head: &str) -> Result<()> {
        let mut cur = Some(head.to_string());
        while let Some(id) = cur {
            if self.objects.contains(&id) {
                // History below an already-present commit is present too.
                break;
            }
            src.objects.copy_object_to(&id, &self.objects)?;
            let commit = self.objects.get_commit(&id)?;
            for blob in commit.tree.values() {
                if !self.objects.contains(blob) {
                    src.objects.copy_object_to(blob, &self.objects)?;
                }
            }
            cur = commit.parent;
        }
        Ok(())
    }

    fn parse_commit_id(id: &str) -> Result<[u8; COMMIT_DIGEST_SIZE]> {
        let bytes = hex::decode(id)
            .map_err(|_| CairnError::Repo(format!("invalid commit id: {id}")))?;
        bytes
            .try_into()
            .map_err(|_| CairnError::Repo(format!("invalid commit id length: {id}")))
    }
}

impl RepoEngine for DagRepo {
    fn root(&self) -> &Path {
        &self.root
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        let id = self.read_ref(branch)?;
        let tree = self.objects.get_commit(&id)?.tree;
        self.materialize(&tree)?;
        self.set_head(branch)
    }

    fn new_branch(&self, name: &str) -> Result<()> {
        if self.ref_path(name).exists() {
            return Err(CairnError::Repo(format!("branch already exists: {name}")));
        }
        let head = self.head_commit_id()?;
        self.write_ref(name, &head)?;
        self.set_head(name)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        if name == self.head_branch()? {
            return Err(CairnError::Repo(format!(
                "cannot delete checked-out branch: {name}"
            )));
        }
        fs::remove_file(self.ref_path(name))
            .map_err(|_| CairnError::Repo(format!("unknown branch: {name}")))
    }

    fn add(&self, path: &Path) -> Result<()> {
        self.reject_escape(path)?;
        if self.root.join(path).is_file() {
            Ok(())
        } else {
            Err(CairnError::Repo(format!(
                "cannot add missing file: {}",
                path.display()
            )))
        }
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.reject_escape(path)?;
        fs::remove_file(self.root.join(path)).map_err(|e| {
            CairnError::Repo(format!("cannot remove {}: {e}", path.display()))
        })
    }

    fn commit(&self, message: &str) -> Result<[u8; COMMIT_DIGEST_SIZE]> {
        let branch = self.head_branch()?;
        let parent_id = self.read_ref(&branch)?;
        let parent = self.objects.get_commit(&parent_id)?;

        let files = self.worktree_files()?;
        let mut tree = BTreeMap::new();
        for (rel, path) in &files {
            let data = fs::read(path)?;
            tree.insert(rel.clone(), self.objects.put_blob(&data)?);
        }
        if tree == parent.tree {
            return Err(CairnError::Repo("nothing to commit".to_string()));
        }

        let (subject, body) = match message.split_once('\n') {
            Some((subject, body)) => (subject.to_string(), body.to_string()),
            None => (message.to_string(), String::new()),
        };
        let commit = Commit {
            parent: Some(parent_id),
            subject,
            body,
            time: Utc::now().timestamp(),
            tree,
        };
        let id = self.objects.put_commit(&commit)?;
        self.write_ref(&branch, &id)?;
        Self::parse_commit_id(&id)
    }

    fn stash(&self) -> Result<()> {
        let head = self.head_commit_id()?;
        let tree = self.objects.get_commit(&head)?.tree;
        self.materialize(&tree)
    }

    fn rebase(&self, onto: &str) -> Result<()> {
        let branch = self.head_branch()?;
        let branch_id = self.read_ref(&branch)?;
        let onto_id = self.read_ref(onto)?;

        if branch_id == onto_id {
            return Ok(());
        }

        // Fast-forward when the current head is already part of the target's
        // history. This is how the publication tier absorbs a pushed branch.
        if self.is_ancestor(&branch_id, &onto_id)? {
            self.write_ref(&branch, &onto_id)?;
            let tree = self.objects.get_commit(&onto_id)?.tree;
            return self.materialize(&tree);
        }

        // Collect the target's ancestry, then peel the current branch back
        // to the first shared commit.
        let mut onto_history = HashSet::new();
        let mut cur = Some(onto_id.clone());
        while let Some(id) = cur {
            cur = self.objects.get_commit(&id)?.parent;
            onto_history.insert(id);
        }

        let mut to_replay = Vec::new();
        let mut cur = Some(branch_id);
        let mut base = None;
        while let Some(id) = cur {
            if onto_history.contains(&id) {
                base = Some(id);
                break;
            }
            let commit = self.objects.get_commit(&id)?;
            cur = commit.parent.clone();
            to_replay.push((id, commit));
        }
        let Some(_base) = base else {
            return Err(CairnError::Repo(format!(
                "cannot rebase {branch} onto {onto}: unrelated histories"
            )));
        };

        // Replay oldest first, carrying each commit's tree delta forward.
        let mut new_head = onto_id;
        for (_, commit) in to_replay.into_iter().rev() {
            let parent_tree = match &commit.parent {
                Some(parent) => self.objects.get_commit(parent)?.tree,
                None => BTreeMap::new(),
            };
            let mut tree = self.objects.get_commit(&new_head)?.tree;
            for (path, blob) in &commit.tree {
                if parent_tree.get(path) != Some(blob) {
                    tree.insert(path.clone(), blob.clone());
                }
            }
            for path in parent_tree.keys() {
                if !commit.tree.contains_key(path) {
                    tree.remove(path);
                }
            }
            let replayed = Commit {
                parent: Some(new_head),
                subject: commit.subject,
                body: commit.body,
                time: commit.time,
                tree,
            };
            new_head = self.objects.put_commit(&replayed)?;
        }

        self.write_ref(&branch, &new_head)?;
        let tree = self.objects.get_commit(&new_head)?.tree;
        self.materialize(&tree)
    }

    fn push(&self, remote: &str, branch: &str, _set_upstream: bool) -> Result<()> {
        if remote != "origin" {
            return Err(CairnError::Repo(format!("unknown remote: {remote}")));
        }
        let origin = self.origin()?;
        let head = self.read_ref(branch)?;
        origin.fetch_reachable(self, &head)?;
        origin.write_ref(branch, &head)
    }

    fn pull(&self, ff_only: bool) -> Result<()> {
        let origin = self.origin()?;
        let branch = self.head_branch()?;
        let local = self.read_ref(&branch)?;
        let remote = origin.read_ref(&branch)?;

        if local == remote {
            return Ok(());
        }
        self.fetch_reachable(&origin, &remote)?;
        if !self.is_ancestor(&local, &remote)? {
            // The engine only ever fast-forwards; a divergent upstream means
            // the single-writer contract was broken.
            let mode = if ff_only { "ff-only " } else { "" };
            return Err(CairnError::Repo(format!(
                "{mode}pull of {branch} would not fast-forward"
            )));
        }
        self.write_ref(&branch, &remote)?;
        let tree = self.objects.get_commit(&remote)?.tree;
        self.materialize(&tree)
    }

    fn diff(&self) -> Result<bool> {
        let head = self.head_commit_id()?;
        let tree = self.objects.get_commit(&head)?.tree;
        Ok(self.worktree_manifest()? != tree)
    }

    fn log(&self, since: Option<[u8; COMMIT_DIGEST_SIZE]>) -> Result<Vec<LogEntry>> {
        let since_hex = since.map(hex::encode);
        let mut entries = Vec::new();
        let mut found = since_hex.is_none();
        let mut cur = Some(self.head_commit_id()?);
        while let Some(id) = cur {
            if since_hex.as_deref() == Some(id.as_str()) {
                found = true;
                break;
            }
            let commit = self.objects.get_commit(&id)?;
            entries.push(LogEntry {
                digest: Self::parse_commit_id(&id)?,
                subject: commit.subject,
            });
            cur = commit.parent;
        }
        if !found {
            return Err(CairnError::Repo(
                "log range start is not in history".to_string(),
            ));
        }
        Ok(entries)
    }

    fn fsck(&self) -> Result<()> {
        let mut verified: HashSet<String> = HashSet::new();
        for branch in self.list_branches()? {
            let mut cur = Some(self.read_ref(&branch)?);
            while let Some(id) = cur {
                let commit = self.objects.get_commit(&id)?;
                if !verified.insert(id.clone()) {
                    break;
                }
                self.objects.verify(&id)?;
                for blob in commit.tree.values() {
                    if verified.insert(blob.clone()) {
                        self.objects.verify(blob)?;
                    }
                }
                cur = commit.parent;
            }
        }
        Ok(())
    }

    fn last_commit_digest(&self) -> Result<[u8; COMMIT_DIGEST_SIZE]> {
        Self::parse_commit_id(&self.head_commit_id()?)
    }

    fn current_branch(&self) -> Result<String> {
        self.head_branch()
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        let mut branches = Vec::new();
        for entry in fs::read_dir(self.dag_path(REFS_DIR))? {
            branches.push(entry?.file_name().to_string_lossy().into_owned());
        }
        branches.sort();
        Ok(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (DagRepo, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = DagRepo::init(dir.path().join("repo"), BTreeMap::new()).unwrap();
        (repo, dir)
    }

    fn write_file(repo: &DagRepo, rel: &str, data: &[u8]) {
        let path = repo.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_init_creates_root_commit_on_master() {
        let (repo, _dir) = init_repo();
        assert_eq!(repo.current_branch().unwrap(), MASTER);
        let log = repo.log(None).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].subject, "Initialize repository");
        repo.fsck().unwrap();
    }

    #[test]
    fn test_commit_and_log() {
        let (repo, _dir) = init_repo();
        write_file(&repo, "a/b.txt", b"hello");
        repo.add(Path::new("a/b.txt")).unwrap();
        let digest = repo.commit("first change").unwrap();

        assert_eq!(repo.last_commit_digest().unwrap(), digest);
        let log = repo.log(None).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].subject, "first change");

        // Ranged log excludes the start commit.
        let root = log[1].digest;
        let ranged = repo.log(Some(root)).unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].digest, digest);
    }

    #[test]
    fn test_commit_without_changes_fails() {
        let (repo, _dir) = init_repo();
        assert!(matches!(
            repo.commit("empty"),
            Err(CairnError::Repo(msg)) if msg.contains("nothing to commit")
        ));
    }

    #[test]
    fn test_diff_and_stash() {
        let (repo, _dir) = init_repo();
        assert!(!repo.diff().unwrap());

        write_file(&repo, "junk.txt", b"uncommitted");
        assert!(repo.diff().unwrap());

        repo.stash().unwrap();
        assert!(!repo.diff().unwrap());
        assert!(!repo.root().join("junk.txt").exists());
    }

    #[test]
    fn test_branch_checkout_isolates_worktree() {
        let (repo, _dir) = init_repo();
        write_file(&repo, "base.txt", b"base");
        repo.commit("base").unwrap();

        repo.new_branch("topic").unwrap();
        write_file(&repo, "topic.txt", b"topic");
        repo.commit("topic change").unwrap();

        repo.checkout(MASTER).unwrap();
        assert!(!repo.root().join("topic.txt").exists());
        assert!(repo.root().join("base.txt").exists());

        repo.checkout("topic").unwrap();
        assert!(repo.root().join("topic.txt").exists());
    }

    #[test]
    fn test_delete_branch_rules() {
        let (repo, _dir) = init_repo();
        repo.new_branch("topic").unwrap();
        // Cannot delete the checked-out branch.
        assert!(repo.delete_branch("topic").is_err());
        repo.checkout(MASTER).unwrap();
        repo.delete_branch("topic").unwrap();
        assert!(repo.delete_branch("topic").is_err());
    }

    #[test]
    fn test_rebase_replays_branch_onto_master() {
        let (repo, _dir) = init_repo();
        // Branch from the root, then advance master independently.
        repo.new_branch("topic").unwrap();
        write_file(&repo, "topic.txt", b"topic");
        repo.commit("topic change").unwrap();

        repo.checkout(MASTER).unwrap();
        write_file(&repo, "master.txt", b"master");
        repo.commit("master change").unwrap();

        repo.checkout("topic").unwrap();
        repo.rebase(MASTER).unwrap();

        // The replayed head carries both changes.
        assert!(repo.root().join("topic.txt").exists());
        assert!(repo.root().join("master.txt").exists());
        let log = repo.log(None).unwrap();
        assert_eq!(log[0].subject, "topic change");
        assert_eq!(log[1].subject, "master change");
        repo.fsck().unwrap();
    }

    #[test]
    fn test_rebase_fast_forwards_master_onto_branch() {
        let (repo, _dir) = init_repo();
        repo.new_branch("topic").unwrap();
        write_file(&repo, "topic.txt", b"topic");
        repo.commit("topic change").unwrap();
        let topic_head = repo.last_commit_digest().unwrap();

        repo.checkout(MASTER).unwrap();
        repo.rebase("topic").unwrap();
        assert_eq!(repo.last_commit_digest().unwrap(), topic_head);
        assert_eq!(repo.current_branch().unwrap(), MASTER);
    }

    #[test]
    fn test_clone_push_pull_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = DagRepo::init(dir.path().join("upstream"), BTreeMap::new()).unwrap();
        let clone =
            DagRepo::clone_from(&upstream, dir.path().join("clone"), BTreeMap::new()).unwrap();

        // Work on a branch in the clone, push it upstream.
        clone.new_branch("topic").unwrap();
        write_file(&clone, "f.txt", b"payload");
        clone.commit("clone change").unwrap();
        clone.push("origin", "topic", true).unwrap();

        // Upstream absorbs the branch into master and drops it.
        upstream.rebase("topic").unwrap();
        upstream.delete_branch("topic").unwrap();

        // The clone fast-forwards its master to match.
        clone.checkout(MASTER).unwrap();
        clone.pull(true).unwrap();
        assert_eq!(
            clone.last_commit_digest().unwrap(),
            upstream.last_commit_digest().unwrap()
        );
        assert!(clone.root().join("f.txt").exists());

        upstream.fsck().unwrap();
        clone.fsck().unwrap();
    }

    #[test]
    fn test_pull_up_to_date_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = DagRepo::init(dir.path().join("upstream"), BTreeMap::new()).unwrap();
        let clone =
            DagRepo::clone_from(&upstream, dir.path().join("clone"), BTreeMap::new()).unwrap();
        clone.pull(true).unwrap();
        assert_eq!(
            clone.last_commit_digest().unwrap(),
            upstream.last_commit_digest().unwrap()
        );
    }

    #[test]
    fn test_remove_stages_deletion() {
        let (repo, _dir) = init_repo();
        write_file(&repo, "doomed.txt", b"bytes");
        repo.commit("add file").unwrap();

        repo.remove(Path::new("doomed.txt")).unwrap();
        repo.commit("remove file").unwrap();
        assert!(!repo.root().join("doomed.txt").exists());

        repo.checkout(MASTER).unwrap();
        assert!(!repo.root().join("doomed.txt").exists());
    }

    #[test]
    fn test_settings_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = BTreeMap::new();
        settings.insert("core.autocrlf".to_string(), "false".to_string());
        let repo = DagRepo::init(dir.path().join("repo"), settings).unwrap();
        assert_eq!(
            repo.setting("core.autocrlf").unwrap().as_deref(),
            Some("false")
        );
    }

    #[test]
    fn test_fsck_detects_corruption() {
        let (repo, _dir) = init_repo();
        write_file(&repo, "f.txt", b"original");
        repo.commit("add file").unwrap();
        repo.fsck().unwrap();

        // Tamper with the stored blob behind the engine's back.
        let blob_key = hex::encode(cairn_core::digest::sha256(b"original"));
        fs::write(repo.objects.dir().join(&blob_key), b"tampered").unwrap();
        assert!(matches!(repo.fsck(), Err(CairnError::Corrupt(_))));
    }
}
