//! Artifact index: document schema, the narrow file capability, and the
//! load state machine.

mod loader;
mod model;
mod reader;

pub use loader::{Banner, BannerSeverity, FatalReason, LoadResult, LoadState, load};
pub use model::{FileRef, JobKind, JobRow, ParsedItems, SchemaVersion, parse_items};
pub use reader::{FileReader, FsReader};
