use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Work,
    Break,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Work => "work",
            SegmentKind::Break => "break",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled work or break interval. Owned by the schedule; the timer
/// only ever reads it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub minutes: u32,
}

impl Segment {
    pub fn new(kind: SegmentKind, minutes: u32) -> Self {
        Self { kind, minutes }
    }

    pub fn work(minutes: u32) -> Self {
        Self::new(SegmentKind::Work, minutes)
    }

    pub fn rest(minutes: u32) -> Self {
        Self::new(SegmentKind::Break, minutes)
    }

    pub fn planned_seconds(&self) -> u32 {
        self.minutes.saturating_mul(60)
    }

    pub fn is_work(&self) -> bool {
        self.kind == SegmentKind::Work
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentParseError {
    #[error("empty segment list")]
    Empty,

    #[error("unknown segment kind in '{0}' (expected w/work or b/break)")]
    UnknownKind(String),

    #[error("invalid minutes in '{0}'")]
    InvalidMinutes(String),

    #[error("segment '{0}' must last at least one minute")]
    ZeroMinutes(String),
}

impl FromStr for Segment {
    type Err = SegmentParseError;

    /// Accepts `w25`, `b5`, `work:25` and `break:5`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();
        let (kind_part, minutes_part) = match token.split_once(':') {
            Some((kind, minutes)) => (kind, minutes),
            None => {
                let split_at = token
                    .find(|c: char| c.is_ascii_digit())
                    .unwrap_or(token.len());
                token.split_at(split_at)
            }
        };

        let kind = match kind_part.to_ascii_lowercase().as_str() {
            "w" | "work" => SegmentKind::Work,
            "b" | "break" => SegmentKind::Break,
            _ => return Err(SegmentParseError::UnknownKind(token.to_string())),
        };

        let minutes: u32 = minutes_part
            .trim()
            .parse()
            .map_err(|_| SegmentParseError::InvalidMinutes(token.to_string()))?;
        if minutes == 0 {
            return Err(SegmentParseError::ZeroMinutes(token.to_string()));
        }

        Ok(Segment::new(kind, minutes))
    }
}

/// Parses a comma-separated schedule such as `w25,b5,w25`.
pub fn parse_segments(raw: &str) -> Result<Vec<Segment>, SegmentParseError> {
    let segments = raw
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Segment::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if segments.is_empty() {
        return Err(SegmentParseError::Empty);
    }
    Ok(segments)
}

/// Index of the last work segment: logging it completes the day.
pub fn final_work_index(segments: &[Segment]) -> Option<usize> {
    segments.iter().rposition(Segment::is_work)
}
