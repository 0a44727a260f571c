//! Data warehouse access.
//!
//! The HTTP layer talks to the warehouse only through the [`Warehouse`]
//! trait; [`BigQueryClient`] is the production implementation.

mod bigquery;
mod rows;
mod types;

pub use bigquery::BigQueryClient;
pub use rows::{convert_row, convert_rows};
pub use types::{
    Dataset, DryRunReport, FieldSchema, QueryOptions, QueryOutcome, QueryRequest, QueryResult,
    Table, TableDetails, TableReference,
};

use crate::error::ServerError;
use async_trait::async_trait;

/// Read access to a data warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Every dataset in the project.
    async fn list_datasets(&self) -> Result<Vec<Dataset>, ServerError>;

    /// Tables of one dataset.
    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<Table>, ServerError>;

    /// Table metadata, `None` when the table does not exist.
    async fn describe_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<Option<TableDetails>, ServerError>;

    /// Validate and estimate a query without running it.
    async fn dry_run(&self, query: &str) -> Result<DryRunReport, ServerError>;

    /// Run a query and collect up to `options.max_rows` rows.
    async fn execute(&self, query: &str, options: &QueryOptions)
        -> Result<QueryOutcome, ServerError>;
}
