//! C11: process guard. Acquires the PID lock before the transport binds,
//! and owns the graceful-shutdown sequence that lifecycle-intent messages
//! trigger (spec.md §4.11).
//!
//! Grounded directly in the `oddjobs` daemon's `lifecycle::DaemonState`:
//! the lock file is opened once and held for the guard's whole lifetime.
//! Unlike that file's approach of reasoning about the recorded pid,
//! staleness here is handled by the OS advisory lock itself:
//! `try_lock_exclusive` only fails while another live process holds it,
//! and the kernel releases the lock the instant that process exits for any
//! reason. "Stale lock (dead pid) is replaced" therefore falls out of the
//! lock call directly — there is no separate, racy liveness probe to get
//! wrong. `{pid, createdAt}` is still written into the file, but purely
//! for operator diagnostics (`paseo ls`-style tooling reading it without
//! taking the lock itself).

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use fs2::FileExt;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("another daemon instance already holds the lock at {path}: {source}")]
    AlreadyRunning {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

/// Who decides whether a `shutdown`/`restart` lifecycle intent actually
/// stops this process (spec.md §4.11: "forward to a parent supervisor ...
/// or, in standalone mode, trigger a graceful stop").
#[derive(Debug, Clone)]
pub enum Supervision {
    /// No parent supervisor: lifecycle intents trigger the graceful-stop
    /// sequence directly.
    Standalone,
    /// An external supervisor (pid `owner_pid`) is responsible for
    /// actually restarting/stopping this process; lifecycle intents are
    /// only logged here.
    Supervised { owner_pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleIntent {
    Shutdown,
    Restart,
}

/// Force-exit timer: if the graceful-stop sequence (HTTP listener close,
/// agent close, store flush) hasn't completed within this window, the
/// process exits immediately rather than hang (spec.md §4.11).
pub const FORCE_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Holds the PID lock file open for the daemon's whole lifetime. Dropping
/// it (including on panic-unwind) releases the OS advisory lock.
pub struct ProcessGuard {
    _lock_file: File,
    lock_path: PathBuf,
    pub supervision: Supervision,
    shutdown: std::sync::Arc<Notify>,
}

impl ProcessGuard {
    /// Acquire `paseo_home/daemon.<listen_id>.lock`, failing fast if a live
    /// daemon already holds it (spec.md §4.11).
    pub fn acquire(
        paseo_home: &Path,
        listen_id: &str,
        supervision: Supervision,
    ) -> Result<Self, GuardError> {
        std::fs::create_dir_all(paseo_home)?;
        let lock_path = paseo_home.join(format!("daemon.{listen_id}.lock"));

        let mut lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|source| GuardError::AlreadyRunning {
                path: lock_path.clone(),
                source,
            })?;

        lock_file.set_len(0)?;
        lock_file.seek(SeekFrom::Start(0))?;
        let contents = LockContents {
            pid: std::process::id(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec(&contents).unwrap_or_default();
        lock_file.write_all(&json)?;
        lock_file.flush()?;

        // `daemon.pid` mirrors the lock for tooling that wants the pid
        // without taking the lock itself (spec.md §6).
        let _ = std::fs::write(paseo_home.join("daemon.pid"), std::process::id().to_string());

        Ok(Self {
            _lock_file: lock_file,
            lock_path,
            supervision,
            shutdown: std::sync::Arc::new(Notify::new()),
        })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// A handle other tasks can `notified().await` on to learn the
    /// graceful-stop sequence has begun.
    pub fn shutdown_signal(&self) -> std::sync::Arc<Notify> {
        self.shutdown.clone()
    }

    /// Handle a `shutdown`/`restart` lifecycle intent arriving over C2. In
    /// standalone mode this wakes every `shutdown_signal()` waiter; in
    /// supervised mode the intent is logged but not acted on here, since
    /// the external supervisor owns the process lifecycle.
    pub fn handle_lifecycle_intent(&self, intent: LifecycleIntent) {
        match &self.supervision {
            Supervision::Supervised { owner_pid } => {
                tracing::info!(
                    owner_pid,
                    ?intent,
                    "lifecycle intent forwarded to supervisor, not acting locally"
                );
            }
            Supervision::Standalone => {
                tracing::info!(?intent, "beginning graceful stop");
                self.shutdown.notify_waiters();
            }
        }
    }
}

/// Run `graceful` to completion, but exit the process if it doesn't finish
/// within `FORCE_EXIT_TIMEOUT` (spec.md §4.11's "10s force-exit timer").
pub async fn shutdown_with_force_exit<F>(graceful: F)
where
    F: std::future::Future<Output = ()>,
{
    if timeout(FORCE_EXIT_TIMEOUT, graceful).await.is_err() {
        tracing::warn!(
            "graceful shutdown exceeded {:?}, forcing exit",
            FORCE_EXIT_TIMEOUT
        );
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let first = ProcessGuard::acquire(dir.path(), "7890", Supervision::Standalone).unwrap();
        let second = ProcessGuard::acquire(dir.path(), "7890", Supervision::Standalone);
        assert!(second.is_err());
        drop(first);
        let third = ProcessGuard::acquire(dir.path(), "7890", Supervision::Standalone);
        assert!(third.is_ok());
    }

    #[test]
    fn writes_pid_file_alongside_lock() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = ProcessGuard::acquire(dir.path(), "7890", Supervision::Standalone).unwrap();
        let pid_contents = std::fs::read_to_string(dir.path().join("daemon.pid")).unwrap();
        assert_eq!(pid_contents, std::process::id().to_string());
    }

    #[tokio::test]
    async fn standalone_intent_wakes_shutdown_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ProcessGuard::acquire(dir.path(), "7890", Supervision::Standalone).unwrap();
        let signal = guard.shutdown_signal();
        let waiter = tokio::spawn(async move {
            signal.notified().await;
        });
        guard.handle_lifecycle_intent(LifecycleIntent::Shutdown);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not wake in time")
            .unwrap();
    }
}
