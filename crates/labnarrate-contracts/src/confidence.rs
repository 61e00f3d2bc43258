//! Inline confidence markers and the aggregate score derived from them.
//!
//! Narration text carries one of three literal, case-sensitive markers per line. Any other
//! bracketed token (`[partial]`, `[high]`, `[NOTE]`) is ordinary text and is left in place.

use crate::narration::{ConfidenceLevel, NarrationSegment};

pub const HIGH_MARKER: &str = "[HIGH]";
pub const MEDIUM_MARKER: &str = "[MEDIUM]";
pub const LOW_MARKER: &str = "[LOW]";

const MARKERS: [&str; 3] = [HIGH_MARKER, MEDIUM_MARKER, LOW_MARKER];

pub fn marker_for(level: ConfidenceLevel) -> &'static str {
    match level {
        ConfidenceLevel::High => HIGH_MARKER,
        ConfidenceLevel::Medium => MEDIUM_MARKER,
        ConfidenceLevel::Low => LOW_MARKER,
    }
}

/// Splits raw narration into one segment per non-empty line, in order.
///
/// A line without a marker is `Medium`. When a line carries several markers the strongest
/// claim wins in the order `[HIGH]`, `[LOW]`, `[MEDIUM]`, and every marker is removed. A line
/// holding nothing but a marker still counts, as a segment with empty text.
pub fn parse_segments(raw: &str) -> Vec<NarrationSegment> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| NarrationSegment {
            confidence: detect_marker(line),
            text: strip_markers(line),
        })
        .collect()
}

/// Averages weights High=3, Medium=2, Low=1. `>= 2.5` is High, `>= 1.5` is Medium.
/// An empty list scores Low.
pub fn score_overall(segments: &[NarrationSegment]) -> ConfidenceLevel {
    if segments.is_empty() {
        return ConfidenceLevel::Low;
    }
    let count = segments.len() as u64;
    let total: u64 = segments
        .iter()
        .map(|segment| u64::from(segment.confidence.weight()))
        .sum();
    // Compare doubled sums so the band edges stay exact.
    if total * 2 >= count * 5 {
        ConfidenceLevel::High
    } else if total * 2 >= count * 3 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// Pessimistic aggregate: the lowest level seen, or `None` for an empty input.
pub fn weakest<I>(levels: I) -> Option<ConfidenceLevel>
where
    I: IntoIterator<Item = ConfidenceLevel>,
{
    levels.into_iter().min()
}

/// Prefixes every unmarked non-empty line with `marker`.
pub fn tag_unmarked_lines(raw: &str, level: ConfidenceLevel) -> String {
    let marker = marker_for(level);
    raw.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || MARKERS.iter().any(|token| line.contains(token)) {
                line.to_string()
            } else {
                format!("{marker} {trimmed}")
            }
        })
        .collect::<Vec<String>>()
        .join("\n")
}

fn detect_marker(line: &str) -> ConfidenceLevel {
    if line.contains(HIGH_MARKER) {
        ConfidenceLevel::High
    } else if line.contains(LOW_MARKER) {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::Medium
    }
}

fn strip_markers(line: &str) -> String {
    let mut out = line.to_string();
    for marker in MARKERS {
        let with_space = format!("{marker} ");
        out = out.replace(&with_space, "").replace(marker, "");
    }
    out.trim().to_string()
}
