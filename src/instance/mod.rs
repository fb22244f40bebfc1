//! Cross-process instance routing: envelope protocol, channel transport,
//! activation handling, and the router that ties them to the workspace
//! mutex.

pub mod activation;
pub mod envelope;
pub mod router;
pub mod transport;

pub use activation::{
    ActivationErrorKind, ActivationOutcome, ActivationResult, ActivationService, IndexRefresh,
    WindowControl, handle,
};
pub use envelope::{
    ActivationRequestPayload, ActivationResponsePayload, ActivationStatus, MAX_ENVELOPE_BYTES,
    MessageEnvelope, MessageType, PROTOCOL_VERSION, ValidationAction, WindowStateTag, validate,
};
pub use router::{InstanceRouter, PrimaryInstance, RouteDecision, RouterError, WorkspaceMutex};
pub use transport::{ClientOutcome, MessageHandler, PipeClient, PipeServer, TransportError};
