//! The owning store handle.
//!
//! `CairnDb` bundles the two repository tiers, the anchor state DB, the
//! filesystem lock, and the timestamp client into the single handle every
//! public operation goes through. One process owns the on-disk layout:
//!
//! ```text
//! <root>/.lock       filesystem mutex
//! <root>/unvetted/   staging tier (one branch per in-flight record)
//! <root>/vetted/     publication tier (master is authoritative history)
//! <root>/state.db    anchor state DB
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use cairn_core::error::{CairnError, Result};
use cairn_core::lock_manager::{LockGuard, LockManager, LOCK_DURATION, LOCK_FILENAME};
use cairn_core::traits::{RepoEngine, TimestampClient};
use cairn_dag::DagRepo;

use crate::statedb::AnchorStateDb;

/// Staging tier directory name under the store root.
pub const UNVETTED_DIR: &str = "unvetted";

/// Publication tier directory name under the store root.
pub const VETTED_DIR: &str = "vetted";

/// Anchor state DB filename under the store root.
pub const STATE_DB_FILENAME: &str = "state.db";

/// Default anchor schedule: minute 58 of every hour
/// (seconds minutes hours day-of-month month day-of-week).
pub const DEFAULT_ANCHOR_SCHEDULE: &str = "0 58 * * * *";

/// Default confirmation watcher wake interval.
pub const DEFAULT_WATCHER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Store configuration.
#[derive(Debug, Clone)]
pub struct CairnConfig {
    /// Root directory owning both tiers, the lock and the state DB.
    pub root: PathBuf,

    /// Base URL of the timestamp authority (used by the HTTP client).
    pub stamp_host: String,

    /// Cron expression driving the anchor task.
    pub anchor_schedule: String,

    /// How often the confirmation watcher wakes without being tickled.
    pub watcher_interval: Duration,
}

impl CairnConfig {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            stamp_host: String::new(),
            anchor_schedule: DEFAULT_ANCHOR_SCHEDULE.to_string(),
            watcher_interval: DEFAULT_WATCHER_INTERVAL,
        }
    }

    pub fn with_stamp_host(mut self, host: impl Into<String>) -> Self {
        self.stamp_host = host.into();
        self
    }

    pub fn with_anchor_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.anchor_schedule = schedule.into();
        self
    }

    pub fn with_watcher_interval(mut self, interval: Duration) -> Self {
        self.watcher_interval = interval;
        self
    }
}

/// The record store.
pub struct CairnDb {
    pub(crate) root: PathBuf,
    pub(crate) staging: Arc<dyn RepoEngine>,
    pub(crate) publication: Arc<dyn RepoEngine>,
    pub(crate) state: AnchorStateDb,
    pub(crate) lock: LockManager,
    pub(crate) stamper: Arc<dyn TimestampClient>,
    shutdown: AtomicBool,
    tickle: Notify,
    stop: Notify,
}

impl CairnDb {
    /// Open the store at `config.root`, creating both tiers on first use.
    ///
    /// The publication repository is initialized first and the staging
    /// repository cloned from it, so the publication tier is the staging
    /// tier's origin. Both engines are fscked before the handle is
    /// returned. No background tasks are started; see [`CairnDb::start`].
    pub fn open(config: &CairnConfig, stamper: Arc<dyn TimestampClient>) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.root)?;
        let lock = LockManager::new(config.root.join(LOCK_FILENAME));
        let guard = lock.acquire(LOCK_DURATION)?;

        let mut settings = BTreeMap::new();
        settings.insert("core.autocrlf".to_string(), "false".to_string());

        let vetted_path = config.root.join(VETTED_DIR);
        let publication = if DagRepo::is_repo(&vetted_path) {
            DagRepo::open(&vetted_path)?
        } else {
            DagRepo::init(&vetted_path, settings.clone())?
        };

        let unvetted_path = config.root.join(UNVETTED_DIR);
        let staging = if DagRepo::is_repo(&unvetted_path) {
            DagRepo::open(&unvetted_path)?
        } else {
            DagRepo::clone_from(&publication, &unvetted_path, settings)?
        };

        tracing::info!("running fsck on publication repository");
        publication.fsck()?;
        tracing::info!("running fsck on staging repository");
        staging.fsck()?;

        let state = AnchorStateDb::open(config.root.join(STATE_DB_FILENAME))?;
        drop(guard);

        Ok(Arc::new(Self {
            root: config.root.clone(),
            staging: Arc::new(staging),
            publication: Arc::new(publication),
            state,
            lock,
            stamper,
            shutdown: AtomicBool::new(false),
            tickle: Notify::new(),
            stop: Notify::new(),
        }))
    }

    /// Open the store, run the boot-time integrity check (logged, not
    /// fatal), and launch the anchor cron and confirmation watcher.
    pub async fn start(
        config: &CairnConfig,
        stamper: Arc<dyn TimestampClient>,
    ) -> Result<(Arc<Self>, Vec<JoinHandle<()>>)> {
        let db = Self::open(config, stamper)?;

        tracing::info!("running integrity check on publication repository");
        if let Err(e) = db.fsck().await {
            tracing::error!("integrity check: {e}");
        }

        let handles = crate::scheduler::spawn_background_tasks(&db, config)?;
        Ok((db, handles))
    }

    /// Shut the store down: new operations fail with `Shutdown` and the
    /// background tasks exit. Work that already holds the lock completes.
    pub fn close(&self) {
        match self.lock.acquire(LOCK_DURATION) {
            Ok(_guard) => self.shutdown.store(true, Ordering::SeqCst),
            Err(e) => {
                tracing::error!("close lock error: {e}");
                self.shutdown.store(true, Ordering::SeqCst);
            }
        }
        self.stop.notify_waiters();
    }

    /// Wake the confirmation watcher ahead of its interval.
    pub fn tickle_watcher(&self) {
        self.tickle.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The staging tier repository.
    pub fn staging(&self) -> &Arc<dyn RepoEngine> {
        &self.staging
    }

    /// The publication tier repository.
    pub fn publication(&self) -> &Arc<dyn RepoEngine> {
        &self.publication
    }

    /// The anchor state DB.
    pub fn state(&self) -> &AnchorStateDb {
        &self.state
    }

    /// Acquire the store lock and fail fast when shutting down. Every
    /// client-facing operation goes through here.
    pub(crate) fn lock_checked(&self) -> Result<LockGuard> {
        let guard = self.lock.acquire(LOCK_DURATION)?;
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(CairnError::Shutdown);
        }
        Ok(guard)
    }

    /// Acquire the store lock without the shutdown check; used by work that
    /// must complete during shutdown (confirmation write-back) and by the
    /// integrity checker.
    pub(crate) fn lock_plain(&self) -> Result<LockGuard> {
        self.lock.acquire(LOCK_DURATION)
    }

    pub(crate) async fn stopped(&self) {
        self.stop.notified().await;
    }

    pub(crate) async fn tickled(&self) {
        self.tickle.notified().await;
    }
}
