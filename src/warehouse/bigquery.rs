//! BigQuery REST v2 implementation of [`Warehouse`].
//!
//! Metadata comes from `datasets.list`, `tables.list` and `tables.get`.
//! Dry runs use `jobs.insert` with `dryRun`; execution uses `jobs.query`
//! followed by `jobs.getQueryResults` for polling and pagination. Every call
//! that is safe to repeat goes through [`with_retry`]; `jobs.query` carries a
//! fresh `requestId` so a retried submission never starts a second job.

use super::rows::convert_rows;
use super::types::{
    gib, Dataset, DryRunReport, FieldSchema, QueryOptions, QueryOutcome, Table, TableDetails,
    TableReference,
};
use super::Warehouse;
use crate::config::BigQueryConfig;
use crate::constants::{METADATA_PAGE_SIZE, QUERY_PAGE_SIZE, QUERY_POLL_TIMEOUT, UPSTREAM_REQUEST_TIMEOUT};
use crate::error::ServerError;
use crate::resilience::{with_retry, RetryConfig};
use crate::upstream::decode_json;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

const SERVICE: &str = "BigQuery";

/// BigQuery client bound to one project.
pub struct BigQueryClient {
    http: Client,
    base_url: Url,
    config: BigQueryConfig,
    retry: RetryConfig,
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig) -> Result<Self, ServerError> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| ServerError::config(format!("BQ_API_BASE_URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ServerError::config(format!(
                "BQ_API_BASE_URL: '{}' is not a base URL",
                config.api_base_url
            )));
        }

        let http = Client::builder()
            .timeout(UPSTREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServerError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            config,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    /// `{base}/projects/{project}/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("projects")
                .push(&self.config.project_id)
                .extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.config.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, url: Url) -> Result<T, ServerError> {
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| ServerError::from_reqwest(SERVICE, e))?;
        decode_json(SERVICE, response).await
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, ServerError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let response = self
            .request(Method::POST, url)
            .json(body)
            .send()
            .await
            .map_err(|e| ServerError::from_reqwest(SERVICE, e))?;
        decode_json(SERVICE, response).await
    }

    async fn get_with_retry<T: DeserializeOwned + Send>(
        &self,
        url: Url,
        label: &str,
    ) -> Result<T, ServerError> {
        with_retry(&self.retry, label, || self.get_json(url.clone())).await
    }

    async fn query_results(
        &self,
        job_id: &str,
        location: Option<&str>,
        page_token: Option<&str>,
        max_results: usize,
        deadline: Instant,
    ) -> Result<QueryResponse, ServerError> {
        let mut url = self.endpoint(&["queries", job_id]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("maxResults", &max_results.to_string())
                .append_pair("timeoutMs", &wait_ms(deadline).to_string())
                .append_pair("formatOptions.useInt64Timestamp", "true");
            if let Some(location) = location {
                query.append_pair("location", location);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        self.get_with_retry(url, "get query results").await
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn list_datasets(&self) -> Result<Vec<Dataset>, ServerError> {
        let mut datasets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = paged(self.endpoint(&["datasets"]), page_token.as_deref());
            let page: DatasetList = self.get_with_retry(url, "list datasets").await?;

            datasets.extend(page.datasets.into_iter().map(|entry| Dataset {
                dataset_id: entry.dataset_reference.dataset_id,
                friendly_name: entry.friendly_name,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} datasets in {}", datasets.len(), self.config.project_id);
        Ok(datasets)
    }

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<Table>, ServerError> {
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = paged(
                self.endpoint(&["datasets", dataset_id, "tables"]),
                page_token.as_deref(),
            );
            let page: TableList = self.get_with_retry(url, "list tables").await?;

            tables.extend(page.tables.into_iter().map(|entry| Table {
                table_id: entry.table_reference.table_id,
                dataset_id: dataset_id.to_string(),
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} tables in {}", tables.len(), dataset_id);
        Ok(tables)
    }

    async fn describe_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<Option<TableDetails>, ServerError> {
        let url = self.endpoint(&["datasets", dataset_id, "tables", table_id]);

        match self.get_with_retry::<TableResource>(url, "get table").await {
            Ok(resource) => Ok(Some(resource.into_details(dataset_id, table_id))),
            Err(ServerError::Upstream {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn dry_run(&self, query: &str) -> Result<DryRunReport, ServerError> {
        let url = self.endpoint(&["jobs"]);
        let body = InsertJob {
            job_reference: NewJobReference {
                project_id: &self.config.project_id,
                location: self.config.location.as_deref(),
            },
            configuration: JobConfiguration {
                dry_run: true,
                query: JobConfigurationQuery {
                    query,
                    use_legacy_sql: false,
                    use_query_cache: false,
                },
            },
        };

        let job: JobResource =
            with_retry(&self.retry, "dry run", || self.post_json(url.clone(), &body)).await?;
        job.into_report()
    }

    async fn execute(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<QueryOutcome, ServerError> {
        let deadline = Instant::now() + options.timeout;
        let page_size = options.max_rows.clamp(1, QUERY_PAGE_SIZE);
        let timeout_error = || ServerError::timeout(options.timeout.as_secs());

        let url = self.endpoint(&["queries"]);
        let body = QueryJobRequest {
            query,
            use_legacy_sql: false,
            request_id: Uuid::new_v4().to_string(),
            maximum_bytes_billed: options.max_bytes_billed.to_string(),
            timeout_ms: wait_ms(deadline),
            max_results: page_size,
            location: self.config.location.as_deref(),
            format_options: FormatOptions {
                use_int64_timestamp: true,
            },
        };

        let mut response: QueryResponse =
            with_retry(&self.retry, "query", || self.post_json(url.clone(), &body)).await?;

        let job = response.job_reference.take().unwrap_or_default();
        let location = job.location.or_else(|| self.config.location.clone());
        let job_id = job.job_id;
        let require_job_id = || {
            job_id.as_deref().ok_or_else(|| {
                ServerError::upstream(SERVICE, None, "query response did not include a job id")
            })
        };

        info!("Query job {} submitted", job_id.as_deref().unwrap_or("<unknown>"));

        while !response.job_complete {
            let id = require_job_id()?;
            if Instant::now() >= deadline {
                return Err(timeout_error());
            }
            debug!("Waiting for query job {} to complete", id);
            response = self
                .query_results(id, location.as_deref(), None, page_size, deadline)
                .await?;
        }

        let schema = response.schema.take().map(|s| s.fields).unwrap_or_default();
        let bytes_processed = parse_u64(response.total_bytes_processed.as_deref()).unwrap_or(0);
        let mut rows = convert_rows(&schema, &response.rows);
        let mut page_token = response.page_token.take();

        while rows.len() < options.max_rows {
            let Some(token) = page_token.take() else {
                break;
            };
            let id = require_job_id()?;
            if Instant::now() >= deadline {
                return Err(timeout_error());
            }

            let page = self
                .query_results(id, location.as_deref(), Some(&token), page_size, deadline)
                .await?;
            debug!("Fetched {} more rows of job {}", page.rows.len(), id);
            rows.extend(convert_rows(&schema, &page.rows));
            page_token = page.page_token.filter(|t| !t.is_empty());
        }

        let truncated = rows.len() > options.max_rows || page_token.is_some();
        rows.truncate(options.max_rows);

        info!(
            "Query job {} returned {} rows{}",
            job_id.as_deref().unwrap_or("<unknown>"),
            rows.len(),
            if truncated { " (truncated)" } else { "" }
        );

        Ok(QueryOutcome {
            job_id,
            schema,
            rows,
            bytes_processed,
            truncated,
        })
    }
}

fn paged(mut url: Url, page_token: Option<&str>) -> Url {
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("maxResults", &METADATA_PAGE_SIZE.to_string());
        if let Some(token) = page_token {
            query.append_pair("pageToken", token);
        }
    }
    url
}

/// Server-side wait for one call: the time left, at most one poll interval.
fn wait_ms(deadline: Instant) -> u64 {
    deadline
        .saturating_duration_since(Instant::now())
        .min(QUERY_POLL_TIMEOUT)
        .as_millis() as u64
}

/// BigQuery encodes int64 values as JSON strings.
fn parse_u64(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.parse().ok())
}

/// Epoch milliseconds (as a string) to `YYYY-MM-DD`.
fn millis_to_date(value: Option<&str>) -> Option<String> {
    let millis: i64 = value?.parse().ok()?;
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive().to_string())
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertJob<'a> {
    job_reference: NewJobReference<'a>,
    configuration: JobConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewJobReference<'a> {
    project_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobConfiguration<'a> {
    dry_run: bool,
    query: JobConfigurationQuery<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobConfigurationQuery<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    use_query_cache: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryJobRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    request_id: String,
    maximum_bytes_billed: String,
    timeout_ms: u64,
    max_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    format_options: FormatOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatOptions {
    use_int64_timestamp: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListEntry {
    dataset_reference: DatasetReference,
    friendly_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: ApiTableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

impl From<ApiTableReference> for TableReference {
    fn from(r: ApiTableReference) -> Self {
        Self {
            project_id: r.project_id,
            dataset_id: r.dataset_id,
            table_id: r.table_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    description: Option<String>,
    schema: Option<ApiSchema>,
    num_rows: Option<String>,
    num_bytes: Option<String>,
    creation_time: Option<String>,
    last_modified_time: Option<String>,
}

impl TableResource {
    fn into_details(self, dataset_id: &str, table_id: &str) -> TableDetails {
        let size_bytes = parse_u64(self.num_bytes.as_deref());
        TableDetails {
            table_id: table_id.to_string(),
            dataset_id: dataset_id.to_string(),
            description: self.description,
            schema: self.schema.map(|s| s.fields).unwrap_or_default(),
            row_count: parse_u64(self.num_rows.as_deref()),
            size_bytes,
            size_gbytes: size_bytes.map(gib),
            created: millis_to_date(self.creation_time.as_deref()),
            last_modified: millis_to_date(self.last_modified_time.as_deref()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: Option<JobReference>,
    #[serde(default)]
    statistics: JobStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatistics {
    total_bytes_processed: Option<String>,
    #[serde(default)]
    query: QueryStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryStatistics {
    statement_type: Option<String>,
    total_bytes_processed: Option<String>,
    #[serde(default)]
    referenced_tables: Vec<ApiTableReference>,
}

impl JobResource {
    fn into_report(self) -> Result<DryRunReport, ServerError> {
        let JobStatistics {
            total_bytes_processed,
            query,
        } = self.statistics;

        let statement_type = query
            .statement_type
            .map(|s| s.to_ascii_uppercase())
            .ok_or_else(|| {
                ServerError::upstream(SERVICE, None, "dry run did not report a statement type")
            })?;

        let total_bytes_processed = parse_u64(
            query
                .total_bytes_processed
                .as_deref()
                .or(total_bytes_processed.as_deref()),
        )
        .unwrap_or(0);

        Ok(DryRunReport {
            job_id: self.job_reference.and_then(|r| r.job_id),
            statement_type,
            total_bytes_processed,
            referenced_tables: query
                .referenced_tables
                .into_iter()
                .map(TableReference::from)
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    schema: Option<ApiSchema>,
    #[serde(default)]
    rows: Vec<Value>,
    page_token: Option<String>,
    total_bytes_processed: Option<String>,
    #[serde(default)]
    job_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> BigQueryClient {
        let mut config = BigQueryConfig::for_project("my-project");
        config.api_base_url = base.to_string();
        BigQueryClient::new(config).unwrap()
    }

    #[test]
    fn test_endpoint_building() {
        let client = client("https://bigquery.googleapis.com/bigquery/v2");
        assert_eq!(
            client.endpoint(&["datasets", "sales", "tables", "daily orders"]).as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/my-project/datasets/sales/tables/daily%20orders"
        );
        assert_eq!(
            client.endpoint(&["jobs"]).as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/my-project/jobs"
        );
    }

    #[test]
    fn test_endpoint_with_trailing_slash_base() {
        let client = client("http://localhost:9050/");
        assert_eq!(
            client.endpoint(&["queries"]).as_str(),
            "http://localhost:9050/projects/my-project/queries"
        );
    }

    #[test]
    fn test_paged_url() {
        let client = client("http://localhost:9050");
        let url = paged(client.endpoint(&["datasets"]), Some("tok en"));
        assert_eq!(
            url.query(),
            Some("maxResults=1000&pageToken=tok+en")
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = BigQueryConfig::for_project("p");
        config.api_base_url = "not a url".to_string();
        assert!(matches!(
            BigQueryClient::new(config),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_dry_run_body() {
        let body = InsertJob {
            job_reference: NewJobReference {
                project_id: "p",
                location: None,
            },
            configuration: JobConfiguration {
                dry_run: true,
                query: JobConfigurationQuery {
                    query: "SELECT 1",
                    use_legacy_sql: false,
                    use_query_cache: false,
                },
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "jobReference": {"projectId": "p"},
                "configuration": {
                    "dryRun": true,
                    "query": {"query": "SELECT 1", "useLegacySql": false, "useQueryCache": false}
                }
            })
        );
    }

    #[test]
    fn test_dry_run_report_parsing() {
        let job: JobResource = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "job_dry"},
            "statistics": {
                "totalBytesProcessed": "2048",
                "query": {
                    "statementType": "select",
                    "referencedTables": [
                        {"projectId": "p", "datasetId": "sales", "tableId": "orders"}
                    ]
                }
            }
        }))
        .unwrap();

        let report = job.into_report().unwrap();
        assert_eq!(report.statement_type, "SELECT");
        assert_eq!(report.total_bytes_processed, 2048);
        assert_eq!(report.job_id.as_deref(), Some("job_dry"));
        assert_eq!(report.referenced_tables[0].qualified_name(), "p.sales.orders");
    }

    #[test]
    fn test_dry_run_without_statement_type() {
        let job: JobResource = serde_json::from_value(json!({"statistics": {}})).unwrap();
        assert!(matches!(
            job.into_report(),
            Err(ServerError::Upstream { .. })
        ));
    }

    #[test]
    fn test_table_resource_details() {
        let resource: TableResource = serde_json::from_value(json!({
            "tableReference": {"projectId": "p", "datasetId": "sales", "tableId": "orders"},
            "description": "All orders",
            "schema": {"fields": [{"name": "id", "type": "INTEGER", "mode": "REQUIRED"}]},
            "numRows": "1200",
            "numBytes": "1073741824",
            "creationTime": "1700000000000",
            "lastModifiedTime": "1709251200000"
        }))
        .unwrap();

        let details = resource.into_details("sales", "orders");
        assert_eq!(details.row_count, Some(1200));
        assert_eq!(details.size_gbytes, Some(1.0));
        assert_eq!(details.created.as_deref(), Some("2023-11-14"));
        assert_eq!(details.last_modified.as_deref(), Some("2024-03-01"));
        assert_eq!(details.schema[0].name, "id");
    }
}
