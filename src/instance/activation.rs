//! Activation decision logic.
//!
//! `handle` is pure and deterministic: it reads the observed window state,
//! issues commands through the injected capabilities, and reports what it
//! did as an outcome set. No platform I/O happens here.

use std::collections::BTreeSet;

use super::envelope::{
    ActivationRequestPayload, ActivationResponsePayload, ActivationStatus, MessageEnvelope,
    MessageType, WindowStateTag,
};
use super::transport::MessageHandler;
use crate::workspace::WorkspaceKey;

/// Observables and commands of the shell window.
pub trait WindowControl: Send + Sync {
    fn is_valid(&self) -> bool;
    fn is_minimized(&self) -> bool;
    fn is_foreground(&self) -> bool;
    fn bring_to_front(&self);
    fn restore_from_minimized(&self);
    fn flash_taskbar(&self);
    fn navigate_to(&self, view: &str);
}

/// Capability to re-run the index loader.
pub trait IndexRefresh: Send + Sync {
    fn refresh(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivationOutcome {
    BroughtToFront,
    AlreadyForeground,
    RestoredFromMinimized,
    NavigatedToView,
    RefreshedIndex,
    TaskbarFlashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationErrorKind {
    InvalidMessage,
    UnsupportedVersion,
    WindowUnavailable,
    WorkspaceKeyMismatch,
    MessageTooLarge,
    InvalidKeyFormat,
}

/// Either exactly one terminal error, or a non-empty success set that always
/// contains `RefreshedIndex`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivationResult {
    Success {
        outcomes: BTreeSet<ActivationOutcome>,
        navigated_to: Option<String>,
    },
    Error {
        kind: ActivationErrorKind,
        message: String,
    },
}

impl ActivationResult {
    fn error(kind: ActivationErrorKind, message: impl Into<String>) -> Self {
        ActivationResult::Error {
            kind,
            message: message.into(),
        }
    }

    /// Project the result into the wire response payload.
    pub fn response_payload(&self) -> ActivationResponsePayload {
        match self {
            ActivationResult::Success {
                outcomes,
                navigated_to,
            } => {
                let window_state = if outcomes.contains(&ActivationOutcome::RestoredFromMinimized)
                    || outcomes.contains(&ActivationOutcome::BroughtToFront)
                {
                    WindowStateTag::Restored
                } else if outcomes.contains(&ActivationOutcome::AlreadyForeground) {
                    WindowStateTag::AlreadyForeground
                } else {
                    WindowStateTag::Unknown
                };
                ActivationResponsePayload {
                    status: ActivationStatus::Activated,
                    window_state: Some(window_state),
                    navigated_to: navigated_to.clone(),
                    error: None,
                }
            }
            ActivationResult::Error { message, .. } => ActivationResponsePayload {
                status: ActivationStatus::Error,
                window_state: None,
                navigated_to: None,
                error: Some(message.clone()),
            },
        }
    }
}

/// Convert a validated request plus observed window state into intended
/// outcomes.
pub fn handle(
    request: &ActivationRequestPayload,
    window: &dyn WindowControl,
    index: &dyn IndexRefresh,
) -> ActivationResult {
    if !window.is_valid() {
        return ActivationResult::error(
            ActivationErrorKind::WindowUnavailable,
            "Window is unavailable",
        );
    }

    let mut outcomes = BTreeSet::new();
    if window.is_minimized() {
        window.restore_from_minimized();
        outcomes.insert(ActivationOutcome::RestoredFromMinimized);
        window.flash_taskbar();
        outcomes.insert(ActivationOutcome::TaskbarFlashed);
    } else if !window.is_foreground() {
        window.bring_to_front();
        outcomes.insert(ActivationOutcome::BroughtToFront);
    } else {
        outcomes.insert(ActivationOutcome::AlreadyForeground);
    }

    let mut navigated_to = None;
    if let Some(view) = request.requested_view.as_deref()
        && !view.is_empty()
    {
        window.navigate_to(view);
        outcomes.insert(ActivationOutcome::NavigatedToView);
        navigated_to = Some(view.to_string());
    }

    index.refresh();
    outcomes.insert(ActivationOutcome::RefreshedIndex);

    ActivationResult::Success {
        outcomes,
        navigated_to,
    }
}

/// Message handler for the primary instance: wires validated envelopes
/// through [`handle`] and answers with an `activation_response`.
pub struct ActivationService {
    key: WorkspaceKey,
    window: std::sync::Arc<dyn WindowControl>,
    index: std::sync::Arc<dyn IndexRefresh>,
}

impl ActivationService {
    pub fn new(
        key: WorkspaceKey,
        window: std::sync::Arc<dyn WindowControl>,
        index: std::sync::Arc<dyn IndexRefresh>,
    ) -> Self {
        Self { key, window, index }
    }
}

impl MessageHandler for ActivationService {
    fn handle(&self, envelope: &MessageEnvelope) -> Option<MessageEnvelope> {
        match envelope.message_type {
            MessageType::ActivationRequest => {
                let request: ActivationRequestPayload =
                    match serde_json::from_value(envelope.payload.clone()) {
                        Ok(request) => request,
                        Err(e) => {
                            tracing::warn!("activation_request payload rejected: {e}");
                            let result = ActivationResult::error(
                                ActivationErrorKind::InvalidMessage,
                                format!("Invalid activation_request payload: {e}"),
                            );
                            return Some(MessageEnvelope::activation_response(
                                &self.key,
                                &result.response_payload(),
                            ));
                        }
                    };

                let result = handle(&request, self.window.as_ref(), self.index.as_ref());
                tracing::debug!(?result, "activation handled");
                Some(MessageEnvelope::activation_response(
                    &self.key,
                    &result.response_payload(),
                ))
            }
            // Responses and pongs arriving at the server are stray traffic.
            MessageType::ActivationResponse | MessageType::Pong => None,
            // Pings are answered in the transport before reaching handlers.
            MessageType::Ping => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::{IndexRefresh, WindowControl};
    use std::sync::Mutex;

    /// Valid, foreground, never-minimized window that records navigations.
    pub struct StubWindow {
        navigations: Mutex<Vec<String>>,
    }

    impl StubWindow {
        pub fn foreground() -> Self {
            Self {
                navigations: Mutex::new(Vec::new()),
            }
        }

        pub fn navigations(&self) -> Vec<String> {
            self.navigations.lock().unwrap().clone()
        }
    }

    impl WindowControl for StubWindow {
        fn is_valid(&self) -> bool {
            true
        }
        fn is_minimized(&self) -> bool {
            false
        }
        fn is_foreground(&self) -> bool {
            true
        }
        fn bring_to_front(&self) {}
        fn restore_from_minimized(&self) {}
        fn flash_taskbar(&self) {}
        fn navigate_to(&self, view: &str) {
            self.navigations.lock().unwrap().push(view.to_string());
        }
    }

    pub struct NoopIndex;

    impl IndexRefresh for NoopIndex {
        fn refresh(&self) {}
    }
}
