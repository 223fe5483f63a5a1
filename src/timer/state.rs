use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::{Segment, SequencerSnapshot};

/// Everything that can move the segment timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMsg {
    Tick,
    Start,
    Pause,
    Resume,
    Skip,
    Reset,
    ExternalUpdate(ExternalPatch),
    CompletionLogged(usize),
}

impl SessionMsg {
    /// User-initiated actions; these are the only messages mirrored remotely
    /// apart from index transitions.
    pub fn is_control_action(&self) -> bool {
        matches!(
            self,
            SessionMsg::Start
                | SessionMsg::Pause
                | SessionMsg::Resume
                | SessionMsg::Skip
                | SessionMsg::Reset
        )
    }
}

/// Partial overwrite of the snapshot coming from another device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalPatch {
    pub current_index: Option<usize>,
    pub seconds_remaining: Option<u32>,
    pub is_running: Option<bool>,
    pub is_finished: Option<bool>,
    pub completed_indices: Option<BTreeSet<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SequencerEffect {
    /// The countdown for `index` ran out. Skips never produce this.
    SegmentCompleted { index: usize, segment: Segment },
    SegmentSkipped { index: usize },
    Advanced { from: usize, to: usize },
    Finished,
}

/// Countdown over an ordered list of work/break segments.
#[derive(Debug, Clone)]
pub struct SegmentSequencer {
    segments: Vec<Segment>,
    state: SequencerSnapshot,
    auto_start_next: bool,
}

impl SegmentSequencer {
    pub fn new(segments: Vec<Segment>, auto_start_next: bool) -> Self {
        let state = SequencerSnapshot::initial(&segments);
        Self {
            segments,
            state,
            auto_start_next,
        }
    }

    /// Restores a previously captured snapshot, clamping anything that no
    /// longer fits the segment list.
    pub fn hydrate(segments: Vec<Segment>, snapshot: SequencerSnapshot, auto_start_next: bool) -> Self {
        let mut sequencer = Self::new(segments, auto_start_next);
        if sequencer.segments.is_empty() {
            return sequencer;
        }

        let index = snapshot.current_index.min(sequencer.segments.len() - 1);
        let planned = sequencer.segments[index].planned_seconds();
        let len = sequencer.segments.len();
        sequencer.state = SequencerSnapshot {
            current_index: index,
            seconds_remaining: snapshot.seconds_remaining.min(planned),
            is_running: snapshot.is_running && !snapshot.is_finished,
            is_finished: snapshot.is_finished,
            completed_indices: snapshot
                .completed_indices
                .into_iter()
                .filter(|completed| *completed < len)
                .collect(),
        };
        sequencer
    }

    pub fn snapshot(&self) -> &SequencerSnapshot {
        &self.state
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.segments.get(self.state.current_index)
    }

    pub fn is_last_index(&self, index: usize) -> bool {
        index + 1 == self.segments.len()
    }

    pub fn set_auto_start_next(&mut self, auto_start_next: bool) {
        self.auto_start_next = auto_start_next;
    }

    pub fn apply(&mut self, msg: SessionMsg) -> Vec<SequencerEffect> {
        let mut effects = Vec::new();
        match msg {
            SessionMsg::Start | SessionMsg::Resume => {
                if !self.state.is_finished {
                    self.state.is_running = true;
                }
            }
            SessionMsg::Pause => {
                self.state.is_running = false;
            }
            SessionMsg::Tick => self.tick(&mut effects),
            SessionMsg::Skip => self.skip(&mut effects),
            SessionMsg::Reset => {
                self.state = SequencerSnapshot::initial(&self.segments);
            }
            SessionMsg::ExternalUpdate(patch) => self.apply_external(patch),
            SessionMsg::CompletionLogged(index) => {
                if index < self.segments.len() {
                    self.state.completed_indices.insert(index);
                }
            }
        }
        effects
    }

    fn tick(&mut self, effects: &mut Vec<SequencerEffect>) {
        if !self.state.is_running || self.state.is_finished {
            return;
        }

        self.state.seconds_remaining = self.state.seconds_remaining.saturating_sub(1);
        if self.state.seconds_remaining > 0 {
            return;
        }

        let index = self.state.current_index;
        let Some(segment) = self.segments.get(index).copied() else {
            return;
        };
        self.state.completed_indices.insert(index);
        effects.push(SequencerEffect::SegmentCompleted { index, segment });

        let keep_running = self.auto_start_next;
        self.advance(keep_running, effects);
    }

    fn skip(&mut self, effects: &mut Vec<SequencerEffect>) {
        if self.state.is_finished {
            return;
        }

        // Shown as done, never credited as work.
        let index = self.state.current_index;
        self.state.completed_indices.insert(index);
        effects.push(SequencerEffect::SegmentSkipped { index });

        let keep_running = self.state.is_running;
        self.advance(keep_running, effects);
    }

    fn advance(&mut self, keep_running: bool, effects: &mut Vec<SequencerEffect>) {
        let from = self.state.current_index;
        let to = from + 1;

        match self.segments.get(to) {
            Some(next) => {
                self.state.current_index = to;
                self.state.seconds_remaining = next.planned_seconds();
                self.state.is_running = keep_running;
                effects.push(SequencerEffect::Advanced { from, to });
            }
            None => {
                self.state.seconds_remaining = 0;
                self.state.is_running = false;
                self.state.is_finished = true;
                effects.push(SequencerEffect::Finished);
            }
        }
    }

    fn apply_external(&mut self, patch: ExternalPatch) {
        if self.segments.is_empty() {
            return;
        }

        if let Some(is_finished) = patch.is_finished {
            self.state.is_finished = is_finished;
        }

        if let Some(index) = patch.current_index {
            if index < self.segments.len() && index != self.state.current_index {
                self.state.current_index = index;
                self.state.seconds_remaining = self.segments[index].planned_seconds();
            }
        }

        let planned = self.segments[self.state.current_index].planned_seconds();
        if let Some(seconds) = patch.seconds_remaining {
            self.state.seconds_remaining = seconds;
        }
        self.state.seconds_remaining = self.state.seconds_remaining.min(planned);

        if let Some(is_running) = patch.is_running {
            self.state.is_running = is_running;
        }
        if self.state.is_finished {
            self.state.is_running = false;
        }

        if let Some(completed) = patch.completed_indices {
            let len = self.segments.len();
            self.state
                .completed_indices
                .extend(completed.into_iter().filter(|index| *index < len));
        }
    }
}
