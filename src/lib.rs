#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod instance;
mod paths;
pub mod telemetry;
pub mod view;
pub mod workspace;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the presentation-facing types at crate root for convenience
pub use crate::index::{
    Banner, BannerSeverity, FatalReason, FileRef, JobKind, JobRow, LoadResult, LoadState,
};
pub use crate::instance::{ActivationOutcome, ActivationResult, RouteDecision};
pub use crate::workspace::{CanonPath, WorkspaceKey};
