//! Debounced directory watcher.
//!
//! The watcher is a polling loop over the watched root: each pass walks the
//! tree, and a file becomes eligible once its mtime has been stable for the
//! configured debounce interval (write-finish detection). Eligible paths
//! flow through a bounded queue into a small pool of ingest workers.
//!
//! Missed or dropped events are harmless: ingestion keys off the content
//! hash, so the next pass (or restart) re-converges on the same state.
//!
//! Exclusions: dotfiles anywhere in the path, and the engine's own snapshot
//! files (`context_snapshot_*.yaml`).

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::ingest::extension_allowed;
use crate::snapshot::is_snapshot_file;

/// Seconds between directory scans.
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Ingest workers draining the event queue.
const WORKER_COUNT: usize = 4;

/// Bounded FIFO of pending paths. Overflow drops the oldest entry with a
/// warning; duplicates of an already-queued path collapse into one event.
pub struct EventQueue {
    inner: Mutex<VecDeque<PathBuf>>,
    notify: Notify,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    pub async fn push(&self, path: PathBuf) {
        let mut queue = self.inner.lock().await;
        if queue.contains(&path) {
            return;
        }
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "watcher queue full, dropping oldest event: {}",
                    dropped.display()
                );
            }
        }
        queue.push_back(path);
        drop(queue);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> PathBuf {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(path) = queue.pop_front() {
                    return path;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Per-path observation state.
struct Observed {
    mtime: std::time::SystemTime,
    changed_at: Instant,
    enqueued_mtime: Option<std::time::SystemTime>,
}

/// Run the watcher until the process stops.
///
/// An initial backfill pass enqueues every existing eligible file without
/// debounce; after that, only files whose mtime settled for the debounce
/// interval are enqueued. Per-file failures are logged, never fatal.
pub async fn run_watch(engine: Arc<Engine>) -> EngineResult<()> {
    let root = engine.config().paths.watched_dir.clone();
    std::fs::create_dir_all(&root)?;

    let queue = Arc::new(EventQueue::new(engine.config().watch.queue_capacity));
    let debounce = Duration::from_secs(engine.config().watch.debounce_secs);
    let excludes = build_globset(&engine.config().watch.exclude_globs)?;

    for worker in 0..WORKER_COUNT {
        let queue = queue.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            loop {
                let path = queue.pop().await;
                match engine.ingest_path(&path).await {
                    Ok(Some(outcome)) => {
                        info!(worker, "{}: {:?} {}", path.display(), outcome.status, outcome.id)
                    }
                    Ok(None) => {}
                    Err(e) => error!(worker, "ingest failed for {}: {}", path.display(), e),
                }
            }
        });
    }

    info!("watching {} (debounce {:?})", root.display(), debounce);

    let mut observed: HashMap<PathBuf, Observed> = HashMap::new();
    let mut backfill_done = false;

    loop {
        let now = Instant::now();

        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !eligible(&root, path, &excludes) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(mtime) = metadata.modified() else {
                continue;
            };

            let state = observed.entry(path.to_path_buf()).or_insert(Observed {
                mtime,
                changed_at: now,
                enqueued_mtime: None,
            });

            if state.mtime != mtime {
                state.mtime = mtime;
                state.changed_at = now;
            }

            let settled = !backfill_done || now.duration_since(state.changed_at) >= debounce;
            if settled && state.enqueued_mtime != Some(mtime) {
                state.enqueued_mtime = Some(mtime);
                queue.push(path.to_path_buf()).await;
            }
        }

        if !backfill_done {
            backfill_done = true;
            info!("initial backfill scan complete ({} files queued)", queue.len().await);
        }

        tokio::time::sleep(SCAN_INTERVAL).await;
    }
}

/// Watcher-level eligibility: no dotfile components, not a snapshot file,
/// not excluded by config, and an allow-listed extension.
fn eligible(root: &Path, path: &Path, excludes: &GlobSet) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let dotted = relative.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
    });
    if dotted {
        return false;
    }

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if is_snapshot_file(name) {
            return false;
        }
    }

    if excludes.is_match(relative) {
        return false;
    }

    extension_allowed(path)
}

fn build_globset(patterns: &[String]) -> EngineResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| crate::error::EngineError::BadRequest(format!("bad exclude glob: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| crate::error::EngineError::BadRequest(format!("bad exclude globs: {e}")))
}
