//! Background refresh scheduler.
//!
//! One thread per projection. Timer ticks are gated three ways: the window
//! must be visible, the failure backoff must not be tripped, and the index
//! file's last-write-time must have advanced since the last poll.
//! Focus-gained and explicit refreshes skip all three gates and reset the
//! backoff. Results cross back to the owner as immutable values on a
//! channel; the poller never touches projection state.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::SystemTime;

use crossbeam::channel::{Receiver, Sender};

use super::projection::PollBackoff;
use crate::config::PollConfig;
use crate::index::{self, FileReader, LoadResult};
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Startup,
    FocusGained,
    Explicit,
    Timer,
}

/// One refresh outcome, marshaled to the owning thread.
#[derive(Debug)]
pub struct PollUpdate {
    pub trigger: RefreshTrigger,
    pub result: LoadResult,
}

/// Handle to the refresh thread. Dropping it cancels the loop and joins.
pub struct Poller {
    trigger_tx: Option<Sender<RefreshTrigger>>,
    visible: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Start polling `workspace_root`. The startup load runs immediately;
    /// its result is the first message on the returned channel.
    pub fn spawn(
        config: PollConfig,
        workspace_root: impl Into<PathBuf>,
        reader: Arc<dyn FileReader + Send + Sync>,
    ) -> (Self, Receiver<PollUpdate>) {
        let workspace_root = workspace_root.into();
        let (trigger_tx, trigger_rx) = crossbeam::channel::unbounded();
        let (update_tx, update_rx) = crossbeam::channel::unbounded();
        let visible = Arc::new(AtomicBool::new(true));

        let handle = {
            let visible = Arc::clone(&visible);
            std::thread::spawn(move || {
                run_loop(config, workspace_root, reader, trigger_rx, update_tx, visible);
            })
        };

        (
            Self {
                trigger_tx: Some(trigger_tx),
                visible,
                handle: Some(handle),
            },
            update_rx,
        )
    }

    /// Timer polling only runs while the window is visible/focused.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    /// Window regained focus: reload now, resetting the backoff.
    pub fn focus_gained(&self) {
        self.send(RefreshTrigger::FocusGained);
    }

    /// Explicit user refresh: reload now, resetting the backoff.
    pub fn refresh(&self) {
        self.send(RefreshTrigger::Explicit);
    }

    fn send(&self, trigger: RefreshTrigger) {
        if let Some(tx) = &self.trigger_tx {
            let _ = tx.send(trigger);
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // Closing the trigger channel is the cancellation signal.
        self.trigger_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct PollLoop {
    workspace_root: PathBuf,
    reader: Arc<dyn FileReader + Send + Sync>,
    update_tx: Sender<PollUpdate>,
    backoff: PollBackoff,
    last_known_good: Vec<index::JobRow>,
    last_mtime: Option<SystemTime>,
}

fn run_loop(
    config: PollConfig,
    workspace_root: PathBuf,
    reader: Arc<dyn FileReader + Send + Sync>,
    trigger_rx: Receiver<RefreshTrigger>,
    update_tx: Sender<PollUpdate>,
    visible: Arc<AtomicBool>,
) {
    let mut state = PollLoop {
        workspace_root,
        reader,
        update_tx,
        backoff: PollBackoff::new(config.failure_threshold),
        last_known_good: Vec::new(),
        last_mtime: None,
    };

    if !state.run_load(RefreshTrigger::Startup) {
        return;
    }

    let ticker = crossbeam::channel::tick(config.interval());
    loop {
        crossbeam::select! {
            recv(trigger_rx) -> msg => {
                let Ok(trigger) = msg else {
                    return; // owner dropped the handle
                };
                state.backoff.reset();
                if !state.run_load(trigger) {
                    return;
                }
            }
            recv(ticker) -> _ => {
                if !visible.load(Ordering::Relaxed) {
                    continue;
                }
                if state.backoff.suspended() {
                    continue;
                }
                if !state.mtime_advanced() {
                    continue;
                }
                if !state.run_load(RefreshTrigger::Timer) {
                    return;
                }
            }
        }
    }
}

impl PollLoop {
    fn current_mtime(&self) -> Option<SystemTime> {
        let index_path = paths::index_path(&self.workspace_root);
        self.reader.modified(&index_path).ok()
    }

    fn mtime_advanced(&self) -> bool {
        self.current_mtime() != self.last_mtime
    }

    /// Returns false when the owner is gone and the loop should exit.
    fn run_load(&mut self, trigger: RefreshTrigger) -> bool {
        self.last_mtime = self.current_mtime();
        let result = index::load(
            self.reader.as_ref(),
            &self.workspace_root,
            &self.last_known_good,
        );
        self.last_known_good = result.last_known_good.clone();
        self.backoff.record(&result);
        self.update_tx
            .send(PollUpdate { trigger, result })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BannerSeverity, FsReader, LoadState};
    use serde_json::json;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config() -> PollConfig {
        PollConfig {
            interval_ms: 25,
            failure_threshold: 3,
        }
    }

    fn write_index(root: &std::path::Path, items: Vec<serde_json::Value>) {
        let dir = root.join(".codecomfy").join("outputs");
        fs::create_dir_all(&dir).unwrap();
        let doc = json!({"schema_version": "0.1", "items": items});
        fs::write(dir.join("index.json"), doc.to_string()).unwrap();
    }

    fn item(id: &str) -> serde_json::Value {
        json!({
            "job_id": id,
            "created_at": "2025-06-01T10:00:00Z",
            "kind": "image",
            "files": [{"path": format!("{id}.png"), "sha256": "a".repeat(64)}],
            "seed": 1
        })
    }

    fn spawn(root: &std::path::Path) -> (Poller, Receiver<PollUpdate>) {
        Poller::spawn(fast_config(), root, Arc::new(FsReader))
    }

    fn recv(rx: &Receiver<PollUpdate>) -> PollUpdate {
        rx.recv_timeout(Duration::from_secs(2)).expect("poll update")
    }

    #[test]
    fn startup_load_arrives_first() {
        let ws = TempDir::new().unwrap();
        write_index(ws.path(), vec![item("a")]);
        let (_poller, rx) = spawn(ws.path());
        let update = recv(&rx);
        assert_eq!(update.trigger, RefreshTrigger::Startup);
        assert!(matches!(update.result.state, LoadState::List { .. }));
    }

    #[test]
    fn timer_reloads_only_when_mtime_advances() {
        let ws = TempDir::new().unwrap();
        write_index(ws.path(), vec![item("a")]);
        let (_poller, rx) = spawn(ws.path());
        recv(&rx); // startup

        // Unchanged file: no timer updates.
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        // Touch the index with new content.
        std::thread::sleep(Duration::from_millis(20));
        write_index(ws.path(), vec![item("a"), item("b")]);
        let update = recv(&rx);
        assert_eq!(update.trigger, RefreshTrigger::Timer);
        match &update.result.state {
            LoadState::List { items } => assert_eq!(items.len(), 2),
            other => panic!("expected List, got {other:?}"),
        }
    }

    #[test]
    fn explicit_refresh_skips_the_mtime_gate() {
        let ws = TempDir::new().unwrap();
        write_index(ws.path(), vec![item("a")]);
        let (poller, rx) = spawn(ws.path());
        recv(&rx);

        poller.refresh();
        let update = recv(&rx);
        assert_eq!(update.trigger, RefreshTrigger::Explicit);
    }

    #[test]
    fn hidden_window_suppresses_timer_polls() {
        let ws = TempDir::new().unwrap();
        write_index(ws.path(), vec![item("a")]);
        let (poller, rx) = spawn(ws.path());
        recv(&rx);

        poller.set_visible(false);
        std::thread::sleep(Duration::from_millis(20));
        write_index(ws.path(), vec![item("a"), item("b")]);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        // Focus always reloads, even while hidden.
        poller.focus_gained();
        let update = recv(&rx);
        assert_eq!(update.trigger, RefreshTrigger::FocusGained);
    }

    #[test]
    fn repeated_failures_suspend_timer_polling_until_explicit_refresh() {
        let ws = TempDir::new().unwrap();
        let dir = ws.path().join(".codecomfy").join("outputs");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.json"), "{").unwrap();

        let (poller, rx) = spawn(ws.path());
        let first = recv(&rx);
        assert_eq!(first.result.banner.severity, BannerSeverity::Warning);

        // Each rewrite advances mtime, so the timer keeps retrying until
        // the third consecutive warning trips the backoff.
        let mut warnings = 1;
        while warnings < 3 {
            std::thread::sleep(Duration::from_millis(20));
            fs::write(dir.join("index.json"), format!("{{ corrupt {warnings}")).unwrap();
            let update = recv(&rx);
            assert_eq!(update.result.banner.severity, BannerSeverity::Warning);
            warnings += 1;
        }

        // Suspended: further mtime changes produce nothing.
        std::thread::sleep(Duration::from_millis(20));
        fs::write(dir.join("index.json"), "{ still corrupt").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        // Explicit refresh resumes (and resets the counter first).
        write_index(ws.path(), vec![item("a")]);
        poller.refresh();
        let update = recv(&rx);
        assert_eq!(update.trigger, RefreshTrigger::Explicit);
        assert!(matches!(update.result.state, LoadState::List { .. }));
    }

    #[test]
    fn last_known_good_survives_corruption_across_polls() {
        let ws = TempDir::new().unwrap();
        write_index(ws.path(), vec![item("a")]);
        let (_poller, rx) = spawn(ws.path());
        recv(&rx);

        std::thread::sleep(Duration::from_millis(20));
        let index_file = ws
            .path()
            .join(".codecomfy")
            .join("outputs")
            .join("index.json");
        fs::write(&index_file, "{").unwrap();
        let update = recv(&rx);
        assert_eq!(update.result.banner.severity, BannerSeverity::Warning);
        match &update.result.state {
            LoadState::List { items } => assert_eq!(items[0].job_id, "a"),
            other => panic!("expected recovered List, got {other:?}"),
        }
    }

    #[test]
    fn drop_stops_the_thread() {
        let ws = TempDir::new().unwrap();
        write_index(ws.path(), vec![item("a")]);
        let (poller, rx) = spawn(ws.path());
        recv(&rx);
        drop(poller);
        // Channel is closed once the loop exits.
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
    }
}
