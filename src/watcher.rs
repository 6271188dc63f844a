//! Bundle file watching
//!
//! A save usually produces several filesystem events (write, rename, attribute
//! change). The first event moves the watcher from idle to pending and
//! schedules one reaction; events arriving while pending are dropped. The
//! reaction waits for the write to settle, runs the callback and returns to
//! idle whether the callback failed or not.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use glob::{MatchOptions, Pattern};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::report::{self, Severity};
use crate::common::sync::lock;
use crate::common::{Error, Result};

/// Async reaction to a bundle change
pub type ChangeCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compile a glob relative to the watched directory (`*`, `**`, `?`, `[..]`)
pub fn bundle_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(&pattern.replace('\\', "/"))
        .map_err(|e| Error::Watch(format!("invalid pattern '{pattern}': {e}")))
}

/// Whether `relative` (a path under the watched directory) matches `pattern`
pub fn matches_bundle(pattern: &Pattern, relative: &Path) -> bool {
    pattern.matches_path_with(relative, MATCH_OPTIONS)
}

/// Idle/pending state plus the scheduled reaction
struct Debouncer {
    pending: AtomicBool,
    disposed: AtomicBool,
    settle: Duration,
    on_change: ChangeCallback,
}

impl Debouncer {
    fn notify(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        // Check and set in one step so two events cannot both see idle
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::trace!("Change coalesced into pending reload");
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.settle).await;
            if !this.disposed.load(Ordering::SeqCst) {
                if let Err(e) = (this.on_change)().await {
                    report::report(Severity::Informational, "watcher.on_change", &e);
                }
            }
            this.pending.store(false, Ordering::SeqCst);
        });
    }
}

/// Watches the bundle and triggers one reload per burst of changes
pub struct FileChangeWatcher {
    debouncer: Arc<Debouncer>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl FileChangeWatcher {
    /// Start watching files under `scope` that match `pattern`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        pattern: &str,
        scope: &Path,
        settle: Duration,
        on_change: ChangeCallback,
    ) -> Result<Self> {
        let matcher = bundle_pattern(pattern)?;
        let scope = scope
            .canonicalize()
            .map_err(|e| Error::Watch(format!("cannot watch {}: {e}", scope.display())))?;

        let this = Self::detached(settle, on_change);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in event.paths {
                            let _ = event_tx.send(path);
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "File watch error"),
            },
            Config::default(),
        )
        .map_err(|e| Error::Watch(format!("failed to create watcher: {e}")))?;

        watcher
            .watch(&scope, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(format!("failed to watch {}: {e}", scope.display())))?;

        let debouncer = Arc::clone(&this.debouncer);
        let root = scope.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(path) = event_rx.recv().await {
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                if matches_bundle(&matcher, relative) {
                    tracing::debug!(path = %relative.display(), "Bundle changed");
                    debouncer.notify();
                }
            }
        });

        tracing::info!(scope = %scope.display(), pattern, "Watching bundle");

        *lock(&this.watcher) = Some(watcher);
        *lock(&this.forwarder) = Some(forwarder);
        Ok(this)
    }

    /// A watcher without a filesystem source; changes come from
    /// [`FileChangeWatcher::notify_change`] only
    pub fn detached(settle: Duration, on_change: ChangeCallback) -> Self {
        Self {
            debouncer: Arc::new(Debouncer {
                pending: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                settle,
                on_change,
            }),
            watcher: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    /// Feed one change event into the idle/pending state machine
    pub fn notify_change(&self) {
        self.debouncer.notify();
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.pending.load(Ordering::SeqCst)
    }

    /// Stop watching. A reaction already waiting to run is skipped.
    pub fn dispose(&self) {
        self.debouncer.disposed.store(true, Ordering::SeqCst);
        // Dropping the notify watcher stops the OS watch
        lock(&self.watcher).take();
        if let Some(forwarder) = lock(&self.forwarder).take() {
            forwarder.abort();
        }
    }
}
