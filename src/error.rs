use thiserror::Error;

use crate::instance::router::RouterError;
use crate::instance::transport::TransportError;
use crate::workspace::WorkspacePathError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
/// Loader outcomes are never routed through here; content issues travel as
/// `LoadResult` values.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Workspace(#[from] WorkspacePathError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Router(#[from] RouterError),
}
