//! Single-instance routing.
//!
//! One window per workspace: whoever creates the workspace mutex is the
//! primary and serves the activation channel; everyone else forwards an
//! activation request and exits. The guiding policy is "trust the mutex":
//! if the mutex is held and the primary might still be handling our
//! activation, we do not spawn a duplicate window.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::activation::{ActivationService, IndexRefresh, WindowControl};
use super::envelope::ActivationRequestPayload;
use super::transport::{ClientOutcome, PipeClient, PipeServer, TransportError};
use crate::config::TransportConfig;
use crate::paths;
use crate::workspace::{CanonPath, WorkspaceKey};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouterError {
    #[error("cannot prepare runtime directory: {0}")]
    Runtime(#[source] io::Error),

    #[error("workspace mutex error at {path}: {source}")]
    Mutex {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Owner metadata recorded in the mutex file, for diagnostics when a
/// secondary suspects an orphan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutexOwnerMeta {
    pub pid: u32,
    pub started_at_ms: u64,
    pub version: String,
}

impl MutexOwnerMeta {
    fn current() -> Self {
        let started_at_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            pid: std::process::id(),
            started_at_ms,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Exclusive ownership of a workspace, backed by a `create_new` lock file.
/// Released on drop.
#[derive(Debug)]
pub struct WorkspaceMutex {
    path: PathBuf,
    released: bool,
}

pub enum MutexAcquire {
    Acquired(WorkspaceMutex),
    /// Held by another process; metadata is best-effort.
    Held { meta: Option<MutexOwnerMeta> },
}

impl WorkspaceMutex {
    pub fn acquire(runtime_dir: &Path, key: &WorkspaceKey) -> Result<MutexAcquire, RouterError> {
        let path = paths::mutex_path(runtime_dir, key);
        let mut open = fs::OpenOptions::new();
        open.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(0o600);
        }

        let mut file = match open.open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let meta = fs::read(&path)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok());
                return Ok(MutexAcquire::Held { meta });
            }
            Err(source) => return Err(RouterError::Mutex { path, source }),
        };

        let meta = MutexOwnerMeta::current();
        serde_json::to_writer(&mut file, &meta)
            .map_err(io::Error::other)
            .and_then(|()| file.sync_all())
            .map_err(|source| RouterError::Mutex {
                path: path.clone(),
                source,
            })?;

        Ok(MutexAcquire::Acquired(WorkspaceMutex {
            path,
            released: false,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for WorkspaceMutex {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// The running primary: mutex plus activation server. Dropping it releases
/// both, in server-then-mutex order.
pub struct PrimaryInstance {
    server: Option<PipeServer>,
    mutex: Option<WorkspaceMutex>,
}

impl PrimaryInstance {
    pub fn socket_path(&self) -> Option<&Path> {
        self.server.as_ref().map(PipeServer::socket_path)
    }
}

impl Drop for PrimaryInstance {
    fn drop(&mut self) {
        self.server.take();
        self.mutex.take();
    }
}

/// What the launcher should do with this invocation.
pub enum RouteDecision {
    /// We are primary: create the window and keep this guard alive.
    CreateWindow(PrimaryInstance),
    /// The mutex is held but activation could not be forwarded; create a
    /// window anyway, without single-instance guarantees.
    CreateWindowDegraded,
    /// The primary took the activation (or is trusted to); exit 0.
    ActivateExisting,
}

impl RouteDecision {
    pub fn describe(&self) -> &'static str {
        match self {
            RouteDecision::CreateWindow(_) => "create_window",
            RouteDecision::CreateWindowDegraded => "create_window_degraded",
            RouteDecision::ActivateExisting => "activate_existing",
        }
    }
}

pub struct InstanceRouter {
    runtime_dir: Option<PathBuf>,
    key: WorkspaceKey,
    workspace: CanonPath,
    transport: TransportConfig,
}

impl InstanceRouter {
    pub fn new(key: WorkspaceKey, workspace: CanonPath, transport: TransportConfig) -> Self {
        Self {
            runtime_dir: None,
            key,
            workspace,
            transport,
        }
    }

    /// Relocate sockets and mutexes, for tests and sandboxed runs.
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Decide whether this invocation creates a window or forwards its
    /// activation to the current primary.
    pub fn route(
        &self,
        requested_view: Option<&str>,
        window: Arc<dyn WindowControl>,
        index: Arc<dyn IndexRefresh>,
    ) -> Result<RouteDecision, RouterError> {
        let runtime_dir = match &self.runtime_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(RouterError::Runtime)?;
                dir.clone()
            }
            None => paths::ensure_runtime_dir().map_err(RouterError::Runtime)?,
        };

        match WorkspaceMutex::acquire(&runtime_dir, &self.key)? {
            MutexAcquire::Acquired(mutex) => {
                let handler = Arc::new(ActivationService::new(self.key.clone(), window, index));
                let server = PipeServer::start(&runtime_dir, &self.key, handler)?;
                tracing::info!(key = %self.key, "primary instance for workspace");
                Ok(RouteDecision::CreateWindow(PrimaryInstance {
                    server: Some(server),
                    mutex: Some(mutex),
                }))
            }
            MutexAcquire::Held { meta } => {
                if let Some(meta) = &meta {
                    tracing::debug!(pid = meta.pid, "workspace mutex held, forwarding activation");
                }
                Ok(self.activate_existing(&runtime_dir, requested_view))
            }
        }
    }

    fn activate_existing(&self, runtime_dir: &Path, requested_view: Option<&str>) -> RouteDecision {
        let client = PipeClient::new(runtime_dir, self.key.clone(), self.transport);
        let mut payload = ActivationRequestPayload::new(self.workspace.as_str());
        payload.requested_view = requested_view.map(str::to_string);

        match client.send_activation(&payload) {
            ClientOutcome::Success(response) => {
                tracing::info!(timestamp = %response.timestamp, "activation accepted by primary");
                RouteDecision::ActivateExisting
            }
            ClientOutcome::ConnectTimeout => {
                // Mutex held but nobody serving the channel: suspected
                // orphan from a crashed primary.
                tracing::warn!("activation channel unreachable; creating window in degraded mode");
                RouteDecision::CreateWindowDegraded
            }
            ClientOutcome::ReceiveTimeout => {
                // Trust the mutex: the primary is busy, not broken.
                tracing::warn!("no activation response in time; trusting the mutex and exiting");
                RouteDecision::ActivateExisting
            }
            ClientOutcome::SendTimeout => {
                tracing::warn!("activation request could not be sent; degraded window");
                RouteDecision::CreateWindowDegraded
            }
            ClientOutcome::NoResponse | ClientOutcome::InvalidResponse => {
                tracing::warn!("primary answered unusably; degraded window");
                RouteDecision::CreateWindowDegraded
            }
            ClientOutcome::Error(e) => {
                tracing::warn!("activation failed: {e}; degraded window");
                RouteDecision::CreateWindowDegraded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::activation::tests_support::{NoopIndex, StubWindow};
    use tempfile::TempDir;

    fn key_for(path: &str) -> (WorkspaceKey, CanonPath) {
        let canon = CanonPath::normalize(path).expect("canon");
        (WorkspaceKey::from_canon(&canon), canon)
    }

    fn fast() -> TransportConfig {
        TransportConfig {
            connect_timeout_ms: 300,
            send_timeout_ms: 300,
            receive_timeout_ms: 500,
        }
    }

    fn router(dir: &TempDir, path: &str) -> InstanceRouter {
        let (key, canon) = key_for(path);
        InstanceRouter::new(key, canon, fast()).with_runtime_dir(dir.path())
    }

    fn capabilities() -> (Arc<StubWindow>, Arc<NoopIndex>) {
        (Arc::new(StubWindow::foreground()), Arc::new(NoopIndex))
    }

    #[test]
    fn first_invocation_is_primary() {
        let dir = TempDir::new().unwrap();
        let (window, index) = capabilities();
        let decision = router(&dir, "/ws/route-cold")
            .route(None, window, index)
            .unwrap();
        match decision {
            RouteDecision::CreateWindow(primary) => {
                assert!(primary.socket_path().unwrap().exists());
            }
            other => panic!("expected CreateWindow, got {}", other.describe()),
        }
    }

    #[test]
    fn second_invocation_activates_existing() {
        let dir = TempDir::new().unwrap();
        let (window, index) = capabilities();
        let _primary = router(&dir, "/ws/route-second")
            .route(None, window.clone(), index.clone())
            .unwrap();

        let decision = router(&dir, "/ws/route-second")
            .route(Some("jobs"), window.clone(), index)
            .unwrap();
        assert!(matches!(decision, RouteDecision::ActivateExisting));
        assert!(window.navigations().contains(&"jobs".to_string()));
    }

    #[test]
    fn orphan_mutex_degrades_to_new_window() {
        let dir = TempDir::new().unwrap();
        let (key, _) = key_for("/ws/route-orphan");
        // Simulate a crashed primary: mutex file exists, no server.
        std::fs::write(paths::mutex_path(dir.path(), &key), b"{}").unwrap();

        let (window, index) = capabilities();
        let decision = router(&dir, "/ws/route-orphan")
            .route(None, window, index)
            .unwrap();
        assert!(matches!(decision, RouteDecision::CreateWindowDegraded));
    }

    #[test]
    fn dropping_primary_releases_mutex_and_socket() {
        let dir = TempDir::new().unwrap();
        let (key, _) = key_for("/ws/route-release");
        let (window, index) = capabilities();
        let decision = router(&dir, "/ws/route-release")
            .route(None, window.clone(), index.clone())
            .unwrap();
        let socket = match &decision {
            RouteDecision::CreateWindow(primary) => primary.socket_path().unwrap().to_path_buf(),
            other => panic!("expected CreateWindow, got {}", other.describe()),
        };
        let mutex_file = paths::mutex_path(dir.path(), &key);
        assert!(mutex_file.exists());
        drop(decision);
        assert!(!mutex_file.exists());
        assert!(!socket.exists());

        // Workspace is claimable again.
        let decision = router(&dir, "/ws/route-release")
            .route(None, window, index)
            .unwrap();
        assert!(matches!(decision, RouteDecision::CreateWindow(_)));
    }

    #[test]
    fn mutex_records_owner_metadata() {
        let dir = TempDir::new().unwrap();
        let (key, _) = key_for("/ws/route-meta");
        let acquired = WorkspaceMutex::acquire(dir.path(), &key).unwrap();
        let MutexAcquire::Acquired(mutex) = acquired else {
            panic!("expected acquisition");
        };
        let bytes = std::fs::read(mutex.path()).unwrap();
        let meta: MutexOwnerMeta = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(meta.pid, std::process::id());

        let held = WorkspaceMutex::acquire(dir.path(), &key).unwrap();
        match held {
            MutexAcquire::Held { meta: Some(meta) } => {
                assert_eq!(meta.pid, std::process::id());
            }
            _ => panic!("expected Held with metadata"),
        }
    }
}
