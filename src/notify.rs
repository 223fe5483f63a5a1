use log::info;
use serde::Serialize;

use crate::{models::SegmentKind, settings::SessionPreferences};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub segment_index: usize,
    pub segment_type: SegmentKind,
    pub is_last_segment: bool,
}

impl TransitionEvent {
    pub fn headline(&self) -> &'static str {
        match (self.segment_type, self.is_last_segment) {
            (_, true) => "Day complete",
            (SegmentKind::Work, false) => "Work segment done, time for a break",
            (SegmentKind::Break, false) => "Break over, back to work",
        }
    }
}

/// Fired on every natural segment completion, work or break.
pub trait Notifier: Send + Sync {
    fn segment_transition(&self, event: &TransitionEvent);
}

/// Writes transitions to the log, honoring the user's notification and sound
/// preferences.
pub struct LogNotifier {
    preferences: SessionPreferences,
}

impl LogNotifier {
    pub fn new(preferences: SessionPreferences) -> Self {
        Self { preferences }
    }
}

impl Notifier for LogNotifier {
    fn segment_transition(&self, event: &TransitionEvent) {
        if !self.preferences.notifications_enabled {
            return;
        }
        if self.preferences.sound_enabled {
            info!("[chime] {} (segment {})", event.headline(), event.segment_index);
        } else {
            info!("{} (segment {})", event.headline(), event.segment_index);
        }
    }
}
