//! Ballot Integrity Checker
//!
//! Compares a submitted ballot's embedded election snapshot against the
//! canonical stored election. Differences confined to per-candidate
//! `selected` flags are the voter's choices; anything else is tampering.

use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::database::models::{Ballot, Election};
use crate::database::Database;
use crate::error::IntegrityError;
use crate::validation::diff::{diff_elections, FieldDiff};
use crate::validation::recursive::{
    group_failures, validate_recursive, ValidationContext, ValidationFailure,
};

/// Collaborators the integrity check needs, passed explicitly.
pub struct IntegrityContext {
    pub store: Database,
    pub clock: Arc<dyn Clock>,
}

/// Accumulated validation outcome. Empty means the submission is clean;
/// storage failures are errors, never entries here.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    fn single(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failures: vec![ValidationFailure::new(member, message)],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures grouped by member path, for API error payloads.
    pub fn grouped(&self) -> Vec<(String, Vec<String>)> {
        group_failures(&self.failures)
    }
}

pub struct BallotIntegrityChecker;

impl BallotIntegrityChecker {
    /// Check a submitted snapshot against the stored election: the election
    /// must exist, the submission must fall inside its voting window, and
    /// the snapshot must differ only in per-candidate `selected` flags.
    pub async fn check(
        snapshot: &Election,
        ctx: &IntegrityContext,
    ) -> Result<ValidationReport, IntegrityError> {
        let Some(stored) = ctx.store.election_by_id(snapshot.id).await? else {
            return Ok(ValidationReport::single(
                "election",
                format!("no election found with id {}", snapshot.id),
            ));
        };

        let now = ctx.clock.now_utc();
        if now < stored.start {
            return Ok(ValidationReport::single(
                "election",
                format!("voting for this election opens at {}", stored.start),
            ));
        }
        if now > stored.end {
            return Ok(ValidationReport::single(
                "election",
                format!("voting for this election closed at {}", stored.end),
            ));
        }

        let tampered: Vec<FieldDiff> = diff_elections(&stored, snapshot)
            .into_iter()
            .filter(|diff| !is_voter_choice(&diff.path))
            .collect();

        if tampered.is_empty() {
            return Ok(ValidationReport::default());
        }

        warn!(
            "Ballot snapshot for election {} differs from the stored election in {} fields",
            snapshot.id,
            tampered.len()
        );
        let failures = tampered
            .into_iter()
            .map(|diff| {
                ValidationFailure::new(
                    diff.path,
                    format!(
                        "submitted value '{}' does not match stored value '{}'",
                        diff.submitted, diff.stored
                    ),
                )
            })
            .collect();
        Ok(ValidationReport { failures })
    }
}

/// Only per-candidate `selected` flags are a voter's legitimate edit.
fn is_voter_choice(path: &str) -> bool {
    path.ends_with(".selected") && path.contains(".candidates[")
}

/// Full submission gate: structural/choice-count validation of the ballot
/// graph plus the integrity check, one accumulated report.
pub async fn validate_submission(
    ballot: &Ballot,
    ctx: &IntegrityContext,
) -> Result<ValidationReport, IntegrityError> {
    let mut failures = Vec::new();
    validate_recursive(
        &ballot.election,
        &ValidationContext { is_ballot: true },
        &mut failures,
    );

    let integrity = BallotIntegrityChecker::check(&ballot.election, ctx).await?;
    failures.extend(integrity.failures);

    Ok(ValidationReport { failures })
}
