//! Structural Diff Engine
//!
//! Field-by-field comparison between a stored election and a submitted
//! snapshot, producing human-readable diff entries with full field paths.
//! Sequences compare elementwise by position; when lengths differ the whole
//! sequence collapses to one entry comparing comma-joined renderings, with
//! complex elements rendered as a placeholder token. That fallback loses
//! per-index locality on purpose: the payoff is a single readable line.

use chrono::{DateTime, Utc};
use std::fmt::Display;

use crate::database::models::{Candidate, Election, Race};

/// Rendering used for a complex element inside the coarse sequence
/// fallback.
pub const COMPLEX_PLACEHOLDER: &str = "<complex>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub path: String,
    pub stored: String,
    pub submitted: String,
}

impl FieldDiff {
    fn new(path: impl Into<String>, stored: impl Into<String>, submitted: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stored: stored.into(),
            submitted: submitted.into(),
        }
    }
}

/// Compare a stored election against a submitted snapshot.
pub fn diff_elections(stored: &Election, submitted: &Election) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    diff_value("id", &stored.id, &submitted.id, &mut diffs);
    diff_value("name", &stored.name, &submitted.name, &mut diffs);
    diff_date("start", stored.start, submitted.start, &mut diffs);
    diff_date("end", stored.end, submitted.end, &mut diffs);
    diff_races("races", &stored.races, &submitted.races, &mut diffs);
    diffs
}

fn diff_value<T: PartialEq + Display>(path: &str, stored: &T, submitted: &T, out: &mut Vec<FieldDiff>) {
    if stored != submitted {
        out.push(FieldDiff::new(path, stored.to_string(), submitted.to_string()));
    }
}

/// Dates compare at second granularity; sub-second noise from
/// serialization round-trips is not a difference.
fn diff_date(path: &str, stored: DateTime<Utc>, submitted: DateTime<Utc>, out: &mut Vec<FieldDiff>) {
    if stored.timestamp() != submitted.timestamp() {
        out.push(FieldDiff::new(
            path,
            stored.to_rfc3339(),
            submitted.to_rfc3339(),
        ));
    }
}

fn diff_optional<T: PartialEq + Display>(
    path: &str,
    stored: &Option<T>,
    submitted: &Option<T>,
    out: &mut Vec<FieldDiff>,
) {
    match (stored, submitted) {
        (None, None) => {}
        (Some(stored), Some(submitted)) => diff_value(path, stored, submitted, out),
        _ => out.push(FieldDiff::new(
            path,
            render_optional(stored),
            render_optional(submitted),
        )),
    }
}

fn render_optional<T: Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string())
}

fn diff_races(path: &str, stored: &[Race], submitted: &[Race], out: &mut Vec<FieldDiff>) {
    if stored.len() != submitted.len() {
        out.push(coarse_sequence_diff(path, stored.len(), submitted.len()));
        return;
    }
    for (i, (stored, submitted)) in stored.iter().zip(submitted).enumerate() {
        diff_race(&format!("{}[{}]", path, i), stored, submitted, out);
    }
}

fn diff_race(prefix: &str, stored: &Race, submitted: &Race, out: &mut Vec<FieldDiff>) {
    diff_value(&format!("{}.id", prefix), &stored.id, &submitted.id, out);
    diff_value(&format!("{}.name", prefix), &stored.name, &submitted.name, out);
    diff_value(
        &format!("{}.max_selections", prefix),
        &stored.max_selections,
        &submitted.max_selections,
        out,
    );
    diff_candidates(
        &format!("{}.candidates", prefix),
        &stored.candidates,
        &submitted.candidates,
        out,
    );
}

fn diff_candidates(path: &str, stored: &[Candidate], submitted: &[Candidate], out: &mut Vec<FieldDiff>) {
    if stored.len() != submitted.len() {
        out.push(coarse_sequence_diff(path, stored.len(), submitted.len()));
        return;
    }
    for (i, (stored, submitted)) in stored.iter().zip(submitted).enumerate() {
        diff_candidate(&format!("{}[{}]", path, i), stored, submitted, out);
    }
}

fn diff_candidate(prefix: &str, stored: &Candidate, submitted: &Candidate, out: &mut Vec<FieldDiff>) {
    diff_value(&format!("{}.id", prefix), &stored.id, &submitted.id, out);
    diff_value(&format!("{}.name", prefix), &stored.name, &submitted.name, out);
    diff_optional(&format!("{}.party", prefix), &stored.party, &submitted.party, out);
    diff_value(
        &format!("{}.selected", prefix),
        &stored.selected,
        &submitted.selected,
        out,
    );
}

fn coarse_sequence_diff(path: &str, stored_len: usize, submitted_len: usize) -> FieldDiff {
    FieldDiff::new(
        path,
        render_placeholder_sequence(stored_len),
        render_placeholder_sequence(submitted_len),
    )
}

fn render_placeholder_sequence(len: usize) -> String {
    vec![COMPLEX_PLACEHOLDER; len].join(",")
}
