pub mod day;
pub mod segment;
pub mod snapshot;

pub use day::DayContext;
pub use segment::{final_work_index, parse_segments, Segment, SegmentKind, SegmentParseError};
pub use snapshot::{PersistedSnapshot, SequencerSnapshot};
