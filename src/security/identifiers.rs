//! Validation of BigQuery identifiers that end up in REST paths.
//!
//! Dataset and table ids from client requests are interpolated into
//! warehouse URLs, so they are checked against BigQuery's naming rules before
//! any request is made.

use crate::error::ServerError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length of an identifier, in bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 1024;

/// Letters, digits and underscores.
static DATASET_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Unicode letters, marks, numbers, connectors, dashes and spaces.
static TABLE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{M}\p{N}\p{Pc}\p{Pd}\p{Zs}]+$").unwrap());

static LOCATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]{1,64}$").unwrap());

/// Project ids, including domain-scoped ones (`example.com:project`).
static PROJECT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.:-]{0,127}$").unwrap());

fn check(kind: &str, value: &str, pattern: &Regex) -> Result<(), ServerError> {
    if value.is_empty() {
        return Err(ServerError::invalid_input(format!("{kind} cannot be empty")));
    }

    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ServerError::invalid_input(format!(
            "{kind} exceeds maximum length of {MAX_IDENTIFIER_LENGTH} bytes"
        )));
    }

    if !pattern.is_match(value) {
        return Err(ServerError::invalid_input(format!(
            "Invalid {}: '{}'",
            kind.to_lowercase(),
            value
        )));
    }

    Ok(())
}

pub fn validate_dataset_id(dataset_id: &str) -> Result<(), ServerError> {
    check("Dataset id", dataset_id, &DATASET_ID)
}

pub fn validate_table_id(table_id: &str) -> Result<(), ServerError> {
    check("Table id", table_id, &TABLE_ID)
}

/// Validate a processing location such as `US` or `europe-west2`.
pub fn validate_location(location: &str) -> Result<(), ServerError> {
    check("Location", location, &LOCATION)
}

pub fn validate_project_id(project_id: &str) -> Result<(), ServerError> {
    check("Project id", project_id, &PROJECT_ID)
}
