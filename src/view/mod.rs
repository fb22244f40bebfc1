//! View-model projection and the refresh scheduler.

mod poller;
mod projection;

pub use poller::{PollUpdate, Poller, RefreshTrigger};
pub use projection::{GalleryProjection, PollBackoff};
