//! Duplicate read suppression
//!
//! A card held in front of the reader is detected on every poll. Reads of
//! the tag accepted last are suppressed until `SUPPRESSION_WINDOW_MS` has
//! passed since it was accepted. Only the immediately previous tag is
//! remembered, so any change of tag id is always accepted.

use crate::domain::event::TagEvent;
use tracing::trace;

/// Window during which repeat reads of the same tag are not republished
pub const SUPPRESSION_WINDOW_MS: u64 = 3000;

/// Last accepted read. Starts empty, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupState {
    last_tag_id: Option<String>,
    last_observed_at: u64,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_tag_id(&self) -> Option<&str> {
        self.last_tag_id.as_deref()
    }

    pub fn last_observed_at(&self) -> u64 {
        self.last_observed_at
    }

    /// Remember an accepted read
    pub fn record(&mut self, tag_id: &str, now: u64) {
        self.last_tag_id = Some(tag_id.to_string());
        self.last_observed_at = now;
    }
}

/// True iff `event` repeats the last accepted tag within the window
pub fn should_suppress(event: &TagEvent, state: &DedupState, now: u64) -> bool {
    let Some(last) = state.last_tag_id.as_deref() else {
        return false;
    };
    if last != event.tag_id {
        return false;
    }

    let elapsed = now.saturating_sub(state.last_observed_at);
    trace!(tag_id = %event.tag_id, elapsed_ms = elapsed, "dedup_same_tag");
    elapsed <= SUPPRESSION_WINDOW_MS
}
