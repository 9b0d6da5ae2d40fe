//! Session table and lifecycle.
//!
//! # Concurrency
//!
//! One mutex guards the session map and the list of files waiting for
//! deletion. Backend calls that touch a session's file (open, create) run
//! outside the lock; deleting files happens only in [`SessionManager::sweep`],
//! under the lock, so a file is never removed while its session is live.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::SessionError;

// ============================================================================
// Configuration
// ============================================================================

/// Shortest period of the background sweep; a zero interval is raised to this.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Session Manager timing.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Sliding lifetime, renewed on every access.
    pub ttl: Duration,
    /// Interval of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// Opaque session key: a random UUID v4 in simple (32 hex digit) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Backing file.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_access: Instant,
    pub expires_at: Instant,
}

impl SessionInfo {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Storage behind each session: creates the backing file and opens handles
/// to it.
pub trait SessionBackend: Send + Sync + 'static {
    /// Live handle returned by [`SessionManager::access`].
    type Handle: Send;

    /// File extension of backing files, without the dot.
    fn extension(&self) -> &str;

    /// Creates and initializes a fresh backing file.
    ///
    /// # Errors
    ///
    /// Any storage error; the session is then not registered.
    fn create(&self, path: &Path) -> Result<(), SessionError>;

    /// Opens a handle on an existing backing file.
    ///
    /// # Errors
    ///
    /// Any storage error.
    fn open(&self, path: &Path) -> Result<Self::Handle, SessionError>;
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionKey, SessionInfo>,
    /// Files of sessions evicted on access, deleted by the next sweep.
    evicted: Vec<PathBuf>,
}

// ============================================================================
// Manager
// ============================================================================

/// Allocates sessions and hands out handles to their storage.
pub struct SessionManager<B: SessionBackend> {
    root: PathBuf,
    backend: B,
    config: SessionManagerConfig,
    table: Mutex<SessionTable>,
}

impl<B: SessionBackend> SessionManager<B> {
    /// Creates a manager storing session files under `root`.
    ///
    /// # Errors
    ///
    /// `SessionError::Io` when `root` cannot be created.
    pub fn new(
        root: impl Into<PathBuf>,
        config: SessionManagerConfig,
        backend: B,
    ) -> Result<Self, SessionError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            backend,
            config,
            table: Mutex::new(SessionTable::default()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// Creates a new session and its backing file.
    ///
    /// # Errors
    ///
    /// Storage errors from the backend.
    pub fn allocate(&self) -> Result<SessionKey, SessionError> {
        let key = SessionKey::generate();
        let path = self
            .root
            .join(format!("{}.{}", key.as_str(), self.backend.extension()));
        self.backend.create(&path)?;

        let now = Instant::now();
        self.table.lock().sessions.insert(
            key.clone(),
            SessionInfo {
                path,
                created_at: Utc::now(),
                last_access: now,
                expires_at: now + self.config.ttl,
            },
        );
        tracing::info!(session = %key, "session allocated");
        Ok(key)
    }

    /// Renews the session and opens a handle on it.
    ///
    /// # Errors
    ///
    /// `InvalidSession` for unknown keys. `SessionExpired` when the TTL has
    /// passed; the session is removed and its file queued for the sweep, so
    /// the next access reports `InvalidSession`.
    pub fn access(&self, key: &str) -> Result<B::Handle, SessionError> {
        let path = {
            let mut table = self.table.lock();
            let key = SessionKey::from(key);
            let now = Instant::now();
            let expired = match table.sessions.get_mut(&key) {
                None => return Err(SessionError::InvalidSession),
                Some(info) if info.is_expired(now) => true,
                Some(info) => {
                    info.last_access = now;
                    info.expires_at = now + self.config.ttl;
                    false
                }
            };
            if expired {
                if let Some(info) = table.sessions.remove(&key) {
                    table.evicted.push(info.path);
                }
                tracing::info!(session = %key, "session expired on access");
                return Err(SessionError::SessionExpired);
            }
            table
                .sessions
                .get(&key)
                .map(|info| info.path.clone())
                .ok_or(SessionError::InvalidSession)?
        };
        self.backend.open(&path)
    }

    /// Runs `f` on a live handle of the session.
    ///
    /// # Errors
    ///
    /// Errors from [`access`](Self::access) or from `f`.
    pub fn with_session<R, F>(&self, key: &str, f: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut B::Handle) -> Result<R, SessionError>,
    {
        let mut handle = self.access(key)?;
        f(&mut handle)
    }

    /// Snapshot of a session, if it exists. Does not renew it.
    #[must_use]
    pub fn info(&self, key: &str) -> Option<SessionInfo> {
        self.table.lock().sessions.get(&SessionKey::from(key)).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().sessions.is_empty()
    }

    /// Removes every expired session and deletes its file, along with files
    /// of sessions evicted on access. Returns the number of files handled.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.lock();

        let expired: Vec<SessionKey> = table
            .sessions
            .iter()
            .filter(|(_, info)| info.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        let mut doomed = std::mem::take(&mut table.evicted);
        for key in expired {
            if let Some(info) = table.sessions.remove(&key) {
                tracing::info!(session = %key, "session expired");
                doomed.push(info.path);
            }
        }

        for path in &doomed {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete session file");
                }
            }
        }
        if !doomed.is_empty() {
            tracing::debug!(removed = doomed.len(), "session sweep done");
        }
        doomed.len()
    }

    /// Spawns the periodic sweep. It stops when `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.config.sweep_interval.max(MIN_TICK);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let manager = Arc::clone(&manager);
                        if let Err(e) = tokio::task::spawn_blocking(move || manager.sweep()).await {
                            tracing::error!(error = %e, "session sweep panicked");
                        }
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Backend writing empty files; handles are the path itself.
    struct FileBackend;

    impl SessionBackend for FileBackend {
        type Handle = PathBuf;

        fn extension(&self) -> &str {
            "bin"
        }

        fn create(&self, path: &Path) -> Result<(), SessionError> {
            std::fs::write(path, b"")?;
            Ok(())
        }

        fn open(&self, path: &Path) -> Result<PathBuf, SessionError> {
            Ok(path.to_path_buf())
        }
    }

    fn manager(dir: &Path, ttl: Duration) -> SessionManager<FileBackend> {
        SessionManager::new(
            dir,
            SessionManagerConfig {
                ttl,
                sweep_interval: Duration::from_millis(10),
            },
            FileBackend,
        )
        .unwrap()
    }

    #[test]
    fn test_allocate_creates_file_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), Duration::from_secs(60));
        let key = mgr.allocate().unwrap();

        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        let path = mgr.access(key.as_str()).unwrap();
        assert_eq!(path, dir.path().join(format!("{key}.bin")));
        assert!(path.exists());
    }

    #[test]
    fn test_keys_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), Duration::from_secs(60));
        let keys: HashSet<SessionKey> = (0..100).map(|_| mgr.allocate().unwrap()).collect();
        assert_eq!(keys.len(), 100);
        assert_eq!(mgr.len(), 100);
    }

    #[test]
    fn test_unknown_key_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), Duration::from_secs(60));
        let err = mgr.access("nope").unwrap_err();
        assert!(matches!(err, SessionError::InvalidSession));
        assert_eq!(err.to_string(), "invalid session");
    }

    /// Tests expiry on access: expired once, then invalid; the file stays
    /// until the sweep.
    #[test]
    fn test_expired_on_access_then_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), Duration::from_millis(50));
        let key = mgr.allocate().unwrap();
        let path = mgr.access(key.as_str()).unwrap();

        std::thread::sleep(Duration::from_millis(70));
        let err = mgr.access(key.as_str()).unwrap_err();
        assert!(matches!(err, SessionError::SessionExpired));
        assert_eq!(err.to_string(), "session expired");
        assert!(path.exists());

        assert!(matches!(
            mgr.access(key.as_str()),
            Err(SessionError::InvalidSession)
        ));

        assert_eq!(mgr.sweep(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_access_renews_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), Duration::from_millis(150));
        let key = mgr.allocate().unwrap();

        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(60));
            let before = Instant::now();
            mgr.access(key.as_str()).unwrap();
            let info = mgr.info(key.as_str()).unwrap();
            assert!(info.expires_at >= before + Duration::from_millis(150));
            assert!(info.last_access >= before);
        }
    }

    /// Tests the sliding window with a 50ms TTL: accesses inside the window
    /// keep the session alive, a gap longer than the TTL ends it.
    #[test]
    fn test_sliding_window_50ms() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), Duration::from_millis(50));
        let key = mgr.allocate().unwrap();

        std::thread::sleep(Duration::from_millis(25));
        mgr.access(key.as_str()).unwrap();

        // 60ms after allocation, past the original deadline but inside the
        // renewed one.
        std::thread::sleep(Duration::from_millis(35));
        mgr.access(key.as_str()).unwrap();

        std::thread::sleep(Duration::from_millis(120));
        assert!(matches!(
            mgr.access(key.as_str()),
            Err(SessionError::SessionExpired)
        ));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let short = manager(dir.path(), Duration::from_millis(20));
        let stale = short.allocate().unwrap();
        let stale_path = short.info(stale.as_str()).unwrap().path;

        std::thread::sleep(Duration::from_millis(40));
        let fresh = short.allocate().unwrap();

        assert_eq!(short.sweep(), 1);
        assert!(!stale_path.exists());
        assert!(short.info(stale.as_str()).is_none());
        assert!(short.info(fresh.as_str()).is_some());
    }

    #[test]
    fn test_with_session_runs_closure() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), Duration::from_secs(60));
        let key = mgr.allocate().unwrap();
        let ext = mgr
            .with_session(key.as_str(), |path| {
                Ok(path.extension().map(|e| e.to_string_lossy().into_owned()))
            })
            .unwrap();
        assert_eq!(ext.as_deref(), Some("bin"));
    }

    #[tokio::test]
    async fn test_background_sweeper_deletes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(manager(dir.path(), Duration::from_millis(10)));
        let key = mgr.allocate().unwrap();
        let path = mgr.info(key.as_str()).unwrap().path;

        let cancel = CancellationToken::new();
        let sweeper = mgr.spawn_sweeper(cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!path.exists());
        assert!(mgr.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_still_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(
            SessionManager::new(
                dir.path(),
                SessionManagerConfig {
                    ttl: Duration::from_millis(10),
                    sweep_interval: Duration::ZERO,
                },
                FileBackend,
            )
            .unwrap(),
        );
        let key = mgr.allocate().unwrap();
        let path = mgr.info(key.as_str()).unwrap().path;

        let cancel = CancellationToken::new();
        let sweeper = mgr.spawn_sweeper(cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!sweeper.is_finished());
        assert!(!path.exists());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
