//! Presentation fields for one workspace.
//!
//! The projection is mutated only by its owner (the UI thread); workers
//! hand over immutable [`LoadResult`] values. The banner is replaced only
//! when it actually changed so steady-state polling never flickers it.

use crate::index::{Banner, BannerSeverity, JobRow, LoadResult, LoadState};

#[derive(Debug)]
pub struct GalleryProjection {
    state: LoadState,
    banner: Banner,
    last_known_good: Vec<JobRow>,
    updated_at: Option<String>,
}

impl Default for GalleryProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl GalleryProjection {
    pub fn new() -> Self {
        Self {
            state: LoadState::Loading,
            banner: Banner::none(),
            last_known_good: Vec::new(),
            updated_at: None,
        }
    }

    /// Entered while a refresh is in flight; the loader itself never
    /// produces `Loading`.
    pub fn mark_loading(&mut self) {
        self.state = LoadState::Loading;
    }

    pub fn apply(&mut self, result: &LoadResult) {
        self.state = result.state.clone();
        if self.banner != result.banner {
            self.banner = result.banner.clone();
        }
        self.last_known_good = result.last_known_good.clone();
        if result.updated_at.is_some() {
            self.updated_at = result.updated_at.clone();
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn banner(&self) -> &Banner {
        &self.banner
    }

    /// Snapshot to feed back into the next loader call.
    pub fn last_known_good(&self) -> &[JobRow] {
        &self.last_known_good
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }
}

/// Timer-poll failure backoff.
///
/// Warning loads count as failures; a clean load (no banner, or an info
/// banner) resets the streak. Once the streak reaches the threshold, timer
/// polling suspends until a focus-gained or explicit refresh resets it.
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    failures: u32,
    threshold: u32,
}

impl PollBackoff {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold,
        }
    }

    pub fn record(&mut self, result: &LoadResult) {
        match result.banner.severity {
            BannerSeverity::Warning => self.failures = self.failures.saturating_add(1),
            BannerSeverity::None | BannerSeverity::Info => self.failures = 0,
        }
    }

    pub fn suspended(&self) -> bool {
        self.failures >= self.threshold
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
