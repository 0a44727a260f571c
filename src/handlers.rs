//! HTTP request handlers.
//!
//! Every handler returns `Result<_, ServerError>`; errors render as
//! `{"detail": "..."}` with the status from [`ServerError::status_code`].
//! Body and query-string rejections are mapped to the same shape.

use crate::constants::{LOG_QUERY_TRUNCATE_LENGTH, MAX_HEALTH_WAIT_SECS};
use crate::error::ServerError;
use crate::search::{ExtractRequest, ExtractResponse, SearchRequest, SearchResponse};
use crate::security::{validate_dataset_id, validate_table_id};
use crate::state::AppState;
use crate::warehouse::{Dataset, DryRunReport, QueryRequest, QueryResult, Table, TableDetails};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// =============================================================================
// Service
// =============================================================================

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to the MCP data gateway" }))
}

#[derive(Debug, Deserialize)]
pub struct HealthParams {
    /// Seconds to wait before answering.
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub elapsed_time: f64,
}

/// Liveness check that can optionally hold the request open, which lets
/// clients probe their own timeouts.
pub async fn health(
    params: Result<Query<HealthParams>, QueryRejection>,
) -> Result<Json<HealthStatus>, ServerError> {
    let Query(params) = params.map_err(|e| ServerError::invalid_input(e.body_text()))?;
    let wait = health_wait(params.timeout);

    let start = Instant::now();
    while start.elapsed() < wait {
        debug!(
            "Health check running... {:.1}s elapsed",
            start.elapsed().as_secs_f64()
        );
        let remaining = wait.saturating_sub(start.elapsed());
        tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
    }

    let elapsed_time = start.elapsed().as_secs_f64();
    debug!("Health check complete. Total time: {:.2}s", elapsed_time);

    Ok(Json(HealthStatus {
        status: "ok",
        elapsed_time,
    }))
}

/// Requested wait, clamped to `0..=MAX_HEALTH_WAIT_SECS`.
fn health_wait(requested: Option<f64>) -> Duration {
    match requested {
        Some(secs) if secs.is_finite() && secs > 0.0 => {
            Duration::from_secs_f64(secs.min(MAX_HEALTH_WAIT_SECS as f64))
        }
        _ => Duration::ZERO,
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Project datasets visible through the allow-list.
pub async fn list_datasets(
    State(state): State<AppState>,
) -> Result<Json<Vec<Dataset>>, ServerError> {
    let allow_list = state.guard.allow_list();
    let datasets: Vec<Dataset> = state
        .warehouse
        .list_datasets()
        .await?
        .into_iter()
        .filter(|dataset| allow_list.permits(&dataset.dataset_id))
        .collect();

    debug!("Returning {} datasets", datasets.len());
    Ok(Json(datasets))
}

pub async fn allowed_datasets(State(state): State<AppState>) -> Json<Vec<Dataset>> {
    let datasets = match state.guard.allow_list().datasets() {
        None => vec![Dataset {
            dataset_id: "*".to_string(),
            friendly_name: Some("All datasets allowed".to_string()),
        }],
        Some(names) => names
            .iter()
            .map(|name| Dataset {
                dataset_id: name.clone(),
                friendly_name: None,
            })
            .collect(),
    };
    Json(datasets)
}

#[derive(Debug, Deserialize)]
pub struct TablesParams {
    #[serde(default)]
    pub dataset_id: Option<String>,
}

/// Tables of one dataset, or of every visible dataset.
pub async fn list_tables(
    State(state): State<AppState>,
    params: Result<Query<TablesParams>, QueryRejection>,
) -> Result<Json<Vec<Table>>, ServerError> {
    let Query(params) = params.map_err(|e| ServerError::invalid_input(e.body_text()))?;
    let allow_list = state.guard.allow_list();

    let dataset_ids = match params.dataset_id.filter(|id| !id.is_empty()) {
        Some(dataset_id) => {
            if !allow_list.permits(&dataset_id) {
                return Err(ServerError::dataset_not_allowed(&dataset_id));
            }
            validate_dataset_id(&dataset_id)?;
            vec![dataset_id]
        }
        None => match allow_list.datasets() {
            Some(names) => names.iter().cloned().collect(),
            None => state
                .warehouse
                .list_datasets()
                .await?
                .into_iter()
                .map(|dataset| dataset.dataset_id)
                .collect(),
        },
    };

    let mut tables = Vec::new();
    for dataset_id in &dataset_ids {
        tables.extend(state.warehouse.list_tables(dataset_id).await?);
    }

    debug!(
        "Returning {} tables from {} datasets",
        tables.len(),
        dataset_ids.len()
    );
    Ok(Json(tables))
}

pub async fn describe_table(
    State(state): State<AppState>,
    Path((dataset_id, table_id)): Path<(String, String)>,
) -> Result<Json<TableDetails>, ServerError> {
    if !state.guard.allow_list().permits(&dataset_id) {
        return Err(ServerError::dataset_not_allowed(&dataset_id));
    }
    validate_dataset_id(&dataset_id)?;
    validate_table_id(&table_id)?;

    state
        .warehouse
        .describe_table(&dataset_id, &table_id)
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::not_found(format!("Table {dataset_id}.{table_id} not found")))
}

// =============================================================================
// Query
// =============================================================================

/// Guard, dry-run, and optionally execute a query.
pub async fn run_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, ServerError> {
    let Json(request) = body.map_err(|e| ServerError::invalid_input(e.body_text()))?;
    let query = request.query.as_str();

    let max_length = state.config.security.max_query_length;
    if query.len() > max_length {
        return Err(ServerError::invalid_input(format!(
            "Query exceeds maximum length of {max_length} bytes"
        )));
    }

    if let Err(rejection) = state.guard.check(query) {
        warn!(
            "Rejected query: {} [{}]",
            rejection,
            truncate_for_log(query, LOG_QUERY_TRUNCATE_LENGTH)
        );
        return Err(rejection.into());
    }

    info!(
        "Validating query{}: {}",
        if request.is_dry_run() { " (dry run)" } else { "" },
        truncate_for_log(query, LOG_QUERY_TRUNCATE_LENGTH)
    );

    let report = state.warehouse.dry_run(query).await?;
    check_dry_run(&state, &report)?;

    if request.is_dry_run() {
        return Ok(Json(QueryResult::from_dry_run(report)));
    }

    let outcome = state
        .warehouse
        .execute(query, &state.query_options())
        .await?;
    Ok(Json(QueryResult::from_outcome(report, outcome)))
}

/// Re-check what the warehouse itself says about the query.
fn check_dry_run(state: &AppState, report: &DryRunReport) -> Result<(), ServerError> {
    let allowed = &state.config.security.allowed_statements;
    if !allowed
        .iter()
        .any(|statement| statement.eq_ignore_ascii_case(&report.statement_type))
    {
        warn!("Warehouse reported statement type {}", report.statement_type);
        return Err(ServerError::validation(format!(
            "Only SELECT queries are allowed. Found: {}",
            report.statement_type
        )));
    }

    let allow_list = state.guard.allow_list();
    if let Some(table) = report
        .referenced_tables
        .iter()
        .find(|table| !allow_list.permits(&table.dataset_id))
    {
        warn!("Warehouse reported reference to {}", table.qualified_name());
        return Err(ServerError::dataset_denied(format!(
            "Access to dataset '{}' is not allowed",
            table.dataset_id
        )));
    }

    Ok(())
}

// =============================================================================
// Search
// =============================================================================

pub async fn web_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ServerError> {
    let provider = state.search_provider()?;
    let Json(request) = body.map_err(|e| ServerError::invalid_input(e.body_text()))?;
    request.validate()?;

    debug!(
        "Web search: {}",
        truncate_for_log(&request.query, LOG_QUERY_TRUNCATE_LENGTH)
    );
    Ok(Json(
        provider.search(&request.query, request.max_results).await?,
    ))
}

pub async fn extract_pages(
    State(state): State<AppState>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, ServerError> {
    let provider = state.search_provider()?;
    let Json(request) = body.map_err(|e| ServerError::invalid_input(e.body_text()))?;
    request.validate()?;

    debug!("Extracting {} URLs", request.urls.len());
    Ok(Json(provider.extract(&request.urls).await?))
}

/// Truncate a string for logging, on a character boundary.
pub fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
