//! Statement-type guard: only read-only (SELECT-family) queries pass.

use super::lexer::{split_statements, tokenize, SqlToken};
use serde::Serialize;
use thiserror::Error;

/// Operations that modify data, schema or permissions.
///
/// Matched case-insensitively against whole unquoted words, never against
/// literals, comments, quoted identifiers or substrings of longer words.
pub const FORBIDDEN_OPERATIONS: [&str; 11] = [
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "MERGE", "REPLACE",
    "GRANT", "REVOKE",
];

/// Why a query was refused by one of the guards.
///
/// The `Display` text is the verdict reason reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    /// No statement at all (empty or whitespace-only input).
    #[error("No valid SQL statement found")]
    EmptyQuery,

    /// A statement exists but has no significant tokens.
    #[error("No valid SQL tokens found")]
    NoTokens,

    /// A forbidden verb appears, carrying the token as written.
    #[error("Operation '{0}' is not allowed")]
    ForbiddenOperation(String),

    /// A referenced dataset is outside the allow-list.
    #[error("Reference to unauthorized dataset: {0}")]
    UnauthorizedDataset(String),

    /// The lexer could not read the input.
    #[error("Unable to tokenize query: {0}")]
    Unparseable(String),
}

/// Outcome of a single validation call.
///
/// `reason` is empty if and only if `ok` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub ok: bool,
    pub reason: String,
}

impl ValidationVerdict {
    /// Verdict for a query that passed.
    pub fn allowed() -> Self {
        Self {
            ok: true,
            reason: String::new(),
        }
    }

    /// Verdict for a query that was refused.
    pub fn denied(violation: &GuardViolation) -> Self {
        Self {
            ok: false,
            reason: violation.to_string(),
        }
    }
}

impl From<Result<(), GuardViolation>> for ValidationVerdict {
    fn from(result: Result<(), GuardViolation>) -> Self {
        match result {
            Ok(()) => Self::allowed(),
            Err(violation) => Self::denied(&violation),
        }
    }
}

/// Check whether a query is read-only.
///
/// The first significant token of the first statement decides the statement
/// type; every significant token of every statement is then scanned so that
/// verbs buried in CTE bodies or later statements are caught as well.
pub fn check_read_only(query: &str) -> Result<(), GuardViolation> {
    if query.trim().is_empty() {
        return Err(GuardViolation::EmptyQuery);
    }

    let tokens = tokenize(query)?;
    let statements = split_statements(&tokens);

    let leading = statements
        .first()
        .and_then(|statement| statement.iter().find(|t| t.is_significant()))
        .ok_or(GuardViolation::NoTokens)?;

    if is_forbidden(leading) {
        return Err(GuardViolation::ForbiddenOperation(leading.text.clone()));
    }

    for statement in &statements {
        if let Some(token) = statement.iter().find(|t| is_forbidden(t)) {
            return Err(GuardViolation::ForbiddenOperation(token.text.clone()));
        }
    }

    Ok(())
}

/// Verdict form of [`check_read_only`].
pub fn is_read_only(query: &str) -> ValidationVerdict {
    check_read_only(query).into()
}

fn is_forbidden(token: &SqlToken) -> bool {
    token.is_any_word(&FORBIDDEN_OPERATIONS)
}
