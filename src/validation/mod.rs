//! Ballot Validation System
//!
//! Recursive structural validation of submitted ballots plus the tamper
//! check comparing a ballot's embedded election snapshot against the
//! canonical stored election.

pub mod diff;
pub mod integrity;
pub mod recursive;

pub use diff::{diff_elections, FieldDiff};
pub use integrity::{
    validate_submission, BallotIntegrityChecker, IntegrityContext, ValidationReport,
};
pub use recursive::{
    group_failures, validate_recursive, ValidateNode, ValidationContext, ValidationFailure,
};
