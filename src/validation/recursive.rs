//! Recursive Validator
//!
//! Walks a ballot's object graph applying each type's constraints at every
//! level. Failures accumulate with full field paths — validation never
//! short-circuits, so one bad candidate does not hide another.

use crate::database::models::{Candidate, Election, Race};

/// Ambient facts the validators need, passed explicitly so required
/// collaborators are visible in the signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationContext {
    /// True when the graph under validation is a submitted ballot snapshot
    /// rather than a canonical election definition. Ballot-only rules
    /// (selection counts) apply only then.
    pub is_ballot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Path of the member the failure refers to, e.g.
    /// `races[1].candidates[0].name`.
    pub member: String,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            message: message.into(),
        }
    }
}

/// A node in the closed domain graph that knows its own constraints and its
/// children.
pub trait ValidateNode {
    fn validate(&self, ctx: &ValidationContext, path: &str, out: &mut Vec<ValidationFailure>);
}

/// Validate `node` and every descendant. Returns true iff no new failure
/// was appended; `out` keeps every failure found at any depth.
pub fn validate_recursive(
    node: &dyn ValidateNode,
    ctx: &ValidationContext,
    out: &mut Vec<ValidationFailure>,
) -> bool {
    let before = out.len();
    node.validate(ctx, "", out);
    out.len() == before
}

/// Group failures by member path, preserving first-occurrence order of
/// members and message order within each member. A failure with an empty
/// message still contributes its (empty) entry.
pub fn group_failures(failures: &[ValidationFailure]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for failure in failures {
        match groups.iter_mut().find(|(member, _)| *member == failure.member) {
            Some((_, messages)) => messages.push(failure.message.clone()),
            None => groups.push((failure.member.clone(), vec![failure.message.clone()])),
        }
    }
    groups
}

fn join_path(prefix: &str, member: &str) -> String {
    if prefix.is_empty() {
        member.to_string()
    } else {
        format!("{}.{}", prefix, member)
    }
}

impl ValidateNode for Election {
    fn validate(&self, ctx: &ValidationContext, path: &str, out: &mut Vec<ValidationFailure>) {
        if self.name.trim().is_empty() {
            out.push(ValidationFailure::new(
                join_path(path, "name"),
                "election name must not be empty",
            ));
        }
        if self.end <= self.start {
            out.push(ValidationFailure::new(
                join_path(path, "end"),
                "election end must be after its start",
            ));
        }
        for (i, race) in self.races.iter().enumerate() {
            race.validate(ctx, &format!("{}[{}]", join_path(path, "races"), i), out);
        }
    }
}

impl ValidateNode for Race {
    fn validate(&self, ctx: &ValidationContext, path: &str, out: &mut Vec<ValidationFailure>) {
        if self.name.trim().is_empty() {
            out.push(ValidationFailure::new(
                join_path(path, "name"),
                "race name must not be empty",
            ));
        }
        if self.max_selections == 0 {
            out.push(ValidationFailure::new(
                join_path(path, "max_selections"),
                "race must allow at least one selection",
            ));
        }
        if ctx.is_ballot {
            let selected = self.candidates.iter().filter(|c| c.selected).count();
            if selected as u32 > self.max_selections {
                out.push(ValidationFailure::new(
                    join_path(path, "candidates"),
                    format!(
                        "{} selections exceed the maximum of {} for this race",
                        selected, self.max_selections
                    ),
                ));
            }
        }
        for (i, candidate) in self.candidates.iter().enumerate() {
            candidate.validate(
                ctx,
                &format!("{}[{}]", join_path(path, "candidates"), i),
                out,
            );
        }
    }
}

impl ValidateNode for Candidate {
    fn validate(&self, _ctx: &ValidationContext, path: &str, out: &mut Vec<ValidationFailure>) {
        if self.name.trim().is_empty() {
            out.push(ValidationFailure::new(
                join_path(path, "name"),
                "candidate name must not be empty",
            ));
        }
    }
}
