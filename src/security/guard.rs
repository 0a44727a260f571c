//! Combined query guard.

use super::datasets::DatasetAllowList;
use super::validation::{check_read_only, GuardViolation, ValidationVerdict};
use crate::error::ServerError;
use std::fmt;

/// Which guard refused a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStage {
    StatementType,
    DatasetReference,
}

/// A refused query: the violation plus the guard that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRejection {
    pub stage: GuardStage,
    pub violation: GuardViolation,
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.violation)
    }
}

impl std::error::Error for GuardRejection {}

impl From<GuardRejection> for ServerError {
    fn from(rejection: GuardRejection) -> Self {
        let reason = rejection.violation.to_string();
        match rejection.stage {
            GuardStage::StatementType => ServerError::validation(reason),
            GuardStage::DatasetReference => ServerError::dataset_denied(reason),
        }
    }
}

/// Runs the statement-type guard, then the dataset guard.
///
/// The cheaper statement check goes first; the dataset scan only runs when a
/// restricted allow-list is configured.
#[derive(Debug, Clone, Default)]
pub struct QueryGuard {
    allow_list: DatasetAllowList,
}

impl QueryGuard {
    pub fn new(allow_list: DatasetAllowList) -> Self {
        Self { allow_list }
    }

    pub fn allow_list(&self) -> &DatasetAllowList {
        &self.allow_list
    }

    /// Check a query, returning the first violation found.
    pub fn check(&self, query: &str) -> Result<(), GuardRejection> {
        check_read_only(query).map_err(|violation| GuardRejection {
            stage: GuardStage::StatementType,
            violation,
        })?;

        self.allow_list
            .check(query)
            .map_err(|violation| GuardRejection {
                stage: GuardStage::DatasetReference,
                violation,
            })
    }

    /// Verdict form of [`QueryGuard::check`].
    pub fn verdict(&self, query: &str) -> ValidationVerdict {
        match self.check(query) {
            Ok(()) => ValidationVerdict::allowed(),
            Err(rejection) => ValidationVerdict::denied(&rejection.violation),
        }
    }
}
