//! The load state machine.
//!
//! `load` is pure: its only I/O goes through the injected [`FileReader`],
//! and every environment or integrity condition comes back as a typed
//! [`LoadResult`], never an `Err`. The caller owns the last-known-good
//! cache and passes it back in; recovery decisions ("keep showing what we
//! had") happen here so every caller agrees on them.

use std::io;
use std::path::Path;

use super::model::{self, JobRow, RawIndex, SchemaVersion};
use super::reader::FileReader;
use crate::paths;

/// Presentation state for one workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    /// Transient entry state; the pure loader never produces it, the
    /// projection uses it while a refresh is in flight.
    Loading,
    /// No jobs to show.
    Empty,
    /// Items in display order (newest first).
    List { items: Vec<JobRow> },
    /// Unrecoverable for this workspace.
    Fatal {
        reason: FatalReason,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    WorkspaceNotFound,
    WorkspaceNotDirectory,
    UnsupportedVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerSeverity {
    None,
    Info,
    Warning,
}

/// Non-fatal, state-derived message surfaced alongside the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub severity: BannerSeverity,
    pub message: String,
    /// Malformed-entry count from the current load only.
    pub skipped_count: usize,
}

impl Banner {
    pub fn none() -> Self {
        Self {
            severity: BannerSeverity::None,
            message: String::new(),
            skipped_count: 0,
        }
    }

    pub fn info(message: impl Into<String>, skipped_count: usize) -> Self {
        Self {
            severity: BannerSeverity::Info,
            message: message.into(),
            skipped_count,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: BannerSeverity::Warning,
            message: message.into(),
            skipped_count: 0,
        }
    }
}

/// One refresh outcome: the state to show, the banner to show with it, and
/// the snapshot the caller should carry into the next load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub state: LoadState,
    pub banner: Banner,
    pub last_known_good: Vec<JobRow>,
    /// Index-level `updated_at`, passed through for freshness display.
    pub updated_at: Option<String>,
}

/// Map the on-disk state of `workspace_root` to a presentation state.
///
/// The decision order is contractual; the first matching rule wins.
pub fn load(reader: &dyn FileReader, workspace_root: &Path, last_known_good: &[JobRow]) -> LoadResult {
    if !reader.exists(workspace_root) {
        return fatal(
            FatalReason::WorkspaceNotFound,
            format!("Workspace not found: {}", workspace_root.display()),
            last_known_good,
        );
    }
    if !reader.is_dir(workspace_root) {
        return fatal(
            FatalReason::WorkspaceNotDirectory,
            format!("Workspace is not a directory: {}", workspace_root.display()),
            last_known_good,
        );
    }

    let index_path = paths::index_path(workspace_root);
    if !reader.exists(&index_path) {
        // Missing .codecomfy/ or outputs/ collapse into this rule.
        return empty(Vec::new(), None);
    }

    let bytes = match reader.read(&index_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return recover("Cannot read index: permission denied", last_known_good);
        }
        Err(e) => {
            return recover(format!("Cannot read index: {e}"), last_known_good);
        }
    };

    // A zero-byte file is a writer crash mid-write, not "no items yet".
    if bytes.is_empty() {
        return recover("Index is empty/corrupt", last_known_good);
    }

    let doc: RawIndex = match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(_) => return recover("Index is corrupt", last_known_good),
    };

    let version = SchemaVersion::parse(doc.schema_version.as_deref());
    if !version.is_supported() {
        return fatal(
            FatalReason::UnsupportedVersion,
            format!(
                "Index schema version {}.{} is newer than this viewer supports; please upgrade",
                version.major, version.minor
            ),
            last_known_good,
        );
    }

    let parsed = model::parse_items(&doc.items);
    if parsed.valid.is_empty() && parsed.skipped == 0 {
        return empty(Vec::new(), doc.updated_at);
    }
    if parsed.valid.is_empty() {
        return recover(
            format!("All {} entries in index are malformed", parsed.skipped),
            last_known_good,
        );
    }

    // File order is append order; display newest first.
    let mut items = parsed.valid;
    items.reverse();

    let banner = if parsed.skipped > 0 {
        Banner::info(skipped_message(parsed.skipped), parsed.skipped)
    } else {
        Banner::none()
    };

    LoadResult {
        state: LoadState::List {
            items: items.clone(),
        },
        banner,
        last_known_good: items,
        updated_at: doc.updated_at,
    }
}

fn skipped_message(skipped: usize) -> String {
    if skipped == 1 {
        "1 item couldn't be displayed".to_string()
    } else {
        format!("{skipped} items couldn't be displayed")
    }
}

fn empty(last_known_good: Vec<JobRow>, updated_at: Option<String>) -> LoadResult {
    LoadResult {
        state: LoadState::Empty,
        banner: Banner::none(),
        last_known_good,
        updated_at,
    }
}

fn fatal(reason: FatalReason, message: String, last_known_good: &[JobRow]) -> LoadResult {
    LoadResult {
        state: LoadState::Fatal {
            reason,
            message: message.clone(),
        },
        banner: Banner::none(),
        last_known_good: last_known_good.to_vec(),
        updated_at: None,
    }
}

/// Integrity failure: keep showing what we had if we had anything.
fn recover(message: impl Into<String>, last_known_good: &[JobRow]) -> LoadResult {
    let state = if last_known_good.is_empty() {
        LoadState::Empty
    } else {
        LoadState::List {
            items: last_known_good.to_vec(),
        }
    };
    LoadResult {
        state,
        banner: Banner::warning(message),
        last_known_good: last_known_good.to_vec(),
        updated_at: None,
    }
}
