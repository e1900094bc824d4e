//! Polling-based source watcher.
//!
//! Sweeps the current date directory every `poll` interval and compares each
//! log file's (mtime, length) with the previous sweep. Changed or new files
//! are announced on an mpsc channel. A source announced less than `debounce`
//! ago is held back and announced once the window has passed, so bursts of
//! appends collapse into one read.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::discovery::{date_dir, list_log_files};

/// Events emitted by the source watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A source was created or appended to.
    Modified(PathBuf),
    /// The production date changed; the new date directory is being watched.
    DateRolled(NaiveDate),
}

pub struct SourceWatcher {
    root: PathBuf,
    poll: Duration,
    debounce: Duration,
    seen: HashMap<PathBuf, (Option<SystemTime>, u64)>,
    last_emit: HashMap<PathBuf, Instant>,
    pending: HashSet<PathBuf>,
}

impl SourceWatcher {
    pub fn new(root: impl Into<PathBuf>, poll: Duration, debounce: Duration) -> Self {
        Self {
            root: root.into(),
            poll,
            debounce,
            seen: HashMap::new(),
            last_emit: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    /// Compare `dir` against the previous sweep and return the sources to
    /// announce now, in path order.
    pub fn sweep(&mut self, dir: &Path, now: Instant) -> Vec<PathBuf> {
        for path in list_log_files(dir) {
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            let stamp = (meta.modified().ok(), meta.len());
            if self.seen.get(&path) != Some(&stamp) {
                self.seen.insert(path.clone(), stamp);
                self.pending.insert(path);
            }
        }

        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|p| {
                self.last_emit
                    .get(*p)
                    .map_or(true, |at| now.saturating_duration_since(*at) >= self.debounce)
            })
            .cloned()
            .collect();
        due.sort();

        for p in &due {
            self.pending.remove(p);
            self.last_emit.insert(p.clone(), now);
        }
        due
    }

    /// Drop all remembered state (date rollover).
    pub fn forget(&mut self) {
        self.seen.clear();
        self.last_emit.clear();
        self.pending.clear();
    }

    /// Run until cancelled or the receiver is dropped.
    ///
    /// `today` is evaluated every sweep so the watcher follows date rollover.
    pub async fn run<F>(mut self, today: F, tx: mpsc::Sender<SourceEvent>, cancel: CancellationToken)
    where
        F: Fn() -> NaiveDate + Send,
    {
        tracing::info!(root = %self.root.display(), "[SourceWatcher] Started");
        let mut current = today();
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("[SourceWatcher] Shutdown signal received, stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let date = today();
            if date != current {
                current = date;
                self.forget();
                if tx.send(SourceEvent::DateRolled(date)).await.is_err() {
                    return;
                }
            }

            let dir = date_dir(&self.root, current);
            for path in self.sweep(&dir, Instant::now()) {
                if tx.send(SourceEvent::Modified(path)).await.is_err() {
                    tracing::debug!("[SourceWatcher] Channel closed, stopping");
                    return;
                }
            }
        }
    }
}
