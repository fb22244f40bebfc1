//! Framed duplex transport on the activation channel.
//!
//! Protocol: one newline-delimited JSON envelope per connection, over a Unix
//! socket named `codecomfy.nextgallery.{workspace_key}` in the runtime
//! directory. Max 64 KiB per message in either direction.
//!
//! The server accepts one client at a time (the listener backlog queues the
//! rest) so handler state stays simple. The client runs three separately
//! bounded phases; a timeout in one phase cancels only that phase and maps
//! to its own outcome.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::envelope::{
    self, ActivationRequestPayload, MAX_ENVELOPE_BYTES, MessageEnvelope, MessageType,
    ValidationAction,
};
use crate::config::TransportConfig;
use crate::paths;
use crate::workspace::WorkspaceKey;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("failed to bind activation channel at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Handler for validated inbound envelopes. Returning an envelope writes it
/// back to the peer.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: &MessageEnvelope) -> Option<MessageEnvelope>;
}

// =============================================================================
// Server
// =============================================================================

/// Accept loop for the primary instance. Owned by the router; dropping it
/// stops the loop and removes the socket.
pub struct PipeServer {
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PipeServer {
    /// Bind the channel for `key` inside `runtime_dir` and start serving.
    pub fn start(
        runtime_dir: &Path,
        key: &WorkspaceKey,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, TransportError> {
        let socket_path = paths::channel_path(runtime_dir, key);

        // A leftover socket from a crashed primary would fail the bind; the
        // mutex, not the socket file, decides who is primary.
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path).map_err(|source| TransportError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600));
        }
        listener.set_nonblocking(true)?;
        tracing::info!(path = %socket_path.display(), "activation channel listening");

        let shutdown = Arc::new(AtomicBool::new(false));
        let key = key.clone();
        let handle = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || accept_loop(listener, key, handler, shutdown))
        };

        Ok(Self {
            socket_path,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn accept_loop(
    listener: UnixListener,
    key: WorkspaceKey,
    handler: Arc<dyn MessageHandler>,
    shutdown: Arc<AtomicBool>,
) {
    let started_at = Instant::now();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::debug!("activation channel shutting down");
            return;
        }

        match listener.accept() {
            Ok((stream, _)) => {
                let _ = stream.set_nonblocking(false);
                // Sequential service keeps activation handling serial per
                // workspace; queued peers wait in the listener backlog.
                if let Err(e) = serve_connection(stream, &key, handler.as_ref(), started_at) {
                    tracing::debug!("activation connection ended: {e}");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                tracing::error!("accept error on activation channel: {e}");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Server-side guard so a stalled or hostile peer cannot pin the accept
/// loop. Not part of the client timeout contract.
const SERVER_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn serve_connection(
    mut stream: UnixStream,
    key: &WorkspaceKey,
    handler: &dyn MessageHandler,
    started_at: Instant,
) -> io::Result<()> {
    stream.set_read_timeout(Some(SERVER_READ_TIMEOUT))?;
    let bytes = match read_frame(&mut stream)? {
        Some(bytes) => bytes,
        None => return Ok(()), // peer connected and went away
    };

    match envelope::validate(&bytes, key) {
        ValidationAction::Drop => Ok(()),
        ValidationAction::RespondWithError { error } => {
            let reply = MessageEnvelope::error_response(key, error);
            write_frame(&mut stream, &reply)
        }
        ValidationAction::Process(envelope) => {
            let reply = match envelope.message_type {
                MessageType::Ping => Some(MessageEnvelope::pong(
                    key,
                    std::process::id(),
                    started_at.elapsed().as_millis() as u64,
                )),
                _ => handler.handle(&envelope),
            };
            match reply {
                Some(reply) => write_frame(&mut stream, &reply),
                None => Ok(()),
            }
        }
    }
}

/// Read one newline-delimited frame, up to one byte past the limit so the
/// validator can reject oversized messages itself.
fn read_frame(stream: &mut UnixStream) -> io::Result<Option<Vec<u8>>> {
    let mut reader = BufReader::new(stream).take(MAX_ENVELOPE_BYTES as u64 + 1);
    let mut buf = Vec::new();
    let read = reader.read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(Some(buf))
}

fn write_frame(stream: &mut UnixStream, envelope: &MessageEnvelope) -> io::Result<()> {
    let mut bytes = envelope.to_bytes();
    bytes.push(b'\n');
    stream.write_all(&bytes)?;
    stream.flush()
}

// =============================================================================
// Client
// =============================================================================

/// Result of one request/response exchange as seen by a secondary instance.
#[derive(Debug)]
pub enum ClientOutcome {
    /// A validated response envelope came back.
    Success(MessageEnvelope),
    /// Could not connect within the connect deadline.
    ConnectTimeout,
    /// Connected, but the request did not go out within the send deadline.
    SendTimeout,
    /// Request sent, no response within the receive deadline. The primary
    /// holds the mutex and may still be handling the activation.
    ReceiveTimeout,
    /// Channel closed before any response bytes.
    NoResponse,
    /// Response arrived but failed envelope validation.
    InvalidResponse,
    /// Anything else.
    Error(String),
}

/// One-shot client for the activation channel of a workspace.
pub struct PipeClient {
    socket_path: PathBuf,
    key: WorkspaceKey,
    timeouts: TransportConfig,
}

impl PipeClient {
    pub fn new(runtime_dir: &Path, key: WorkspaceKey, timeouts: TransportConfig) -> Self {
        Self {
            socket_path: paths::channel_path(runtime_dir, &key),
            key,
            timeouts,
        }
    }

    /// Send one `activation_request` and await one response.
    pub fn send_activation(&self, payload: &ActivationRequestPayload) -> ClientOutcome {
        let request = MessageEnvelope::activation_request(&self.key, payload);
        self.exchange(&request)
    }

    /// Health check: send a `ping`, expect a `pong`.
    pub fn ping(&self) -> ClientOutcome {
        let request = MessageEnvelope::ping(&self.key);
        self.exchange(&request)
    }

    fn exchange(&self, request: &MessageEnvelope) -> ClientOutcome {
        // Phase 1: connect.
        let mut stream = match self.connect_with_deadline() {
            Ok(stream) => stream,
            Err(outcome) => return outcome,
        };

        // Phase 2: send.
        if let Err(e) = stream.set_write_timeout(Some(self.timeouts.send_timeout())) {
            return ClientOutcome::Error(e.to_string());
        }
        let mut bytes = request.to_bytes();
        bytes.push(b'\n');
        match stream.write_all(&bytes).and_then(|()| stream.flush()) {
            Ok(()) => {}
            Err(e) if is_timeout(&e) => return ClientOutcome::SendTimeout,
            Err(e) => return ClientOutcome::Error(e.to_string()),
        }

        // Phase 3: receive.
        if let Err(e) = stream.set_read_timeout(Some(self.timeouts.receive_timeout())) {
            return ClientOutcome::Error(e.to_string());
        }
        let bytes = match read_frame(&mut stream) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return ClientOutcome::NoResponse,
            Err(e) if is_timeout(&e) => return ClientOutcome::ReceiveTimeout,
            Err(e) => return ClientOutcome::Error(e.to_string()),
        };

        match envelope::validate(&bytes, &self.key) {
            ValidationAction::Process(envelope) => ClientOutcome::Success(envelope),
            _ => ClientOutcome::InvalidResponse,
        }
    }

    /// Unix sockets refuse instantly rather than block, so the connect
    /// deadline is a retry window: keep trying until it expires.
    fn connect_with_deadline(&self) -> Result<UnixStream, ClientOutcome> {
        let deadline = Instant::now() + self.timeouts.connect_timeout();
        let mut backoff = Duration::from_millis(25);
        loop {
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => return Ok(stream),
                Err(e) if is_retryable_connect(&e) => {
                    if Instant::now() >= deadline {
                        return Err(ClientOutcome::ConnectTimeout);
                    }
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(200));
                }
                Err(e) => return Err(ClientOutcome::Error(e.to_string())),
            }
        }
    }
}

fn is_retryable_connect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
