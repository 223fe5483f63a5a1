use serde::Serialize;

use crate::{models::SequencerSnapshot, notify::TransitionEvent};

pub const ANOMALY_MESSAGE: &str = "your timer kept running, but this session may not be recorded";

/// Everything a front end needs to render a session. Emitted on the
/// orchestrator's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged {
        snapshot: SequencerSnapshot,
    },
    SegmentTransition(TransitionEvent),
    #[serde(rename_all = "camelCase")]
    SegmentLogged {
        segment_index: usize,
        actual_seconds: u32,
    },
    #[serde(rename_all = "camelCase")]
    LoggingAnomaly {
        segment_index: usize,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    LoggingFailed {
        segment_index: usize,
        message: String,
    },
    DayCompleted,
    PlanCompleted,
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SegmentKind;

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(SessionEvent::SegmentTransition(TransitionEvent {
            segment_index: 0,
            segment_type: SegmentKind::Work,
            is_last_segment: false,
        }))
        .unwrap();
        assert_eq!(json["type"], "segmentTransition");
        assert_eq!(json["segmentType"], "work");

        let json = serde_json::to_value(SessionEvent::LoggingAnomaly {
            segment_index: 2,
            message: ANOMALY_MESSAGE.into(),
        })
        .unwrap();
        assert_eq!(json["type"], "loggingAnomaly");
        assert_eq!(json["segmentIndex"], 2);
    }
}
