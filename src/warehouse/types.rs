//! Request and response types shared by the warehouse and the HTTP layer.

use crate::constants::BYTES_PER_GIB;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A dataset in the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: String,
    pub friendly_name: Option<String>,
}

/// A table, identified by dataset and table id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub table_id: String,
    pub dataset_id: String,
}

/// One column of a table or query result schema.
///
/// Also the wire shape of BigQuery's `TableFieldSchema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Sub-fields of a RECORD/STRUCT column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: None,
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"))
    }
}

/// Table metadata returned by the describe route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDetails {
    pub table_id: String,
    pub dataset_id: String,
    pub description: Option<String>,
    pub schema: Vec<FieldSchema>,
    pub row_count: Option<u64>,
    pub size_bytes: Option<u64>,
    pub size_gbytes: Option<f64>,
    /// Creation date, `YYYY-MM-DD`.
    pub created: Option<String>,
    /// Last modification date, `YYYY-MM-DD`.
    pub last_modified: Option<String>,
}

/// Fully qualified table reference reported by a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    /// `project.dataset.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Body of `POST /bigquery/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

impl QueryRequest {
    pub fn is_dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }
}

/// Limits applied to an executed query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub max_bytes_billed: u64,
    pub timeout: Duration,
    pub max_rows: usize,
}

/// What the warehouse reports about a query without running it.
#[derive(Debug, Clone, PartialEq)]
pub struct DryRunReport {
    pub job_id: Option<String>,
    /// Upper-case statement type, e.g. `SELECT`.
    pub statement_type: String,
    pub total_bytes_processed: u64,
    pub referenced_tables: Vec<TableReference>,
}

/// Rows and statistics of an executed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub job_id: Option<String>,
    pub schema: Vec<FieldSchema>,
    pub rows: Vec<Map<String, Value>>,
    pub bytes_processed: u64,
    /// More rows were available than `max_rows`.
    pub truncated: bool,
}

/// Response of `POST /bigquery/query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Map<String, Value>>,
    pub total_rows: usize,
    pub schema: Vec<FieldSchema>,
    pub bytes_processed: u64,
    pub gbytes_processed: f64,
    pub job_id: Option<String>,
    pub referenced_tables: Vec<String>,
    pub statement_type: String,
    pub truncated: bool,
}

impl QueryResult {
    /// Result of a dry run: no rows, only the estimate.
    pub fn from_dry_run(report: DryRunReport) -> Self {
        Self {
            rows: Vec::new(),
            total_rows: 0,
            schema: Vec::new(),
            bytes_processed: report.total_bytes_processed,
            gbytes_processed: gib(report.total_bytes_processed),
            job_id: report.job_id,
            referenced_tables: qualified_names(&report.referenced_tables),
            statement_type: report.statement_type,
            truncated: false,
        }
    }

    /// Result of an executed query, labelled with its dry-run report.
    pub fn from_outcome(report: DryRunReport, outcome: QueryOutcome) -> Self {
        Self {
            total_rows: outcome.rows.len(),
            rows: outcome.rows,
            schema: outcome.schema,
            bytes_processed: outcome.bytes_processed,
            gbytes_processed: gib(outcome.bytes_processed),
            job_id: outcome.job_id,
            referenced_tables: qualified_names(&report.referenced_tables),
            statement_type: report.statement_type,
            truncated: outcome.truncated,
        }
    }
}

pub(crate) fn gib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GIB
}

fn qualified_names(tables: &[TableReference]) -> Vec<String> {
    tables.iter().map(TableReference::qualified_name).collect()
}
