//! Centralized constants for the data gateway.
//!
//! Default values and limits used throughout the codebase.

use std::time::Duration;

// =============================================================================
// Warehouse Constants
// =============================================================================

/// Default BigQuery REST endpoint.
pub const DEFAULT_BIGQUERY_API_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Default per-query billing cap (1 GiB).
pub const DEFAULT_MAX_BYTES_BILLED: u64 = 1_073_741_824;

/// Bytes in a GiB, used to report `gbytes_processed`.
pub const BYTES_PER_GIB: f64 = 1_073_741_824.0;

/// Statement types the warehouse may report for an executable query.
pub const ALLOWED_STATEMENTS: [&str; 1] = ["SELECT"];

/// Maximum time the server-side `jobs.query` call waits before returning.
pub const QUERY_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Rows fetched per page of query results.
pub const QUERY_PAGE_SIZE: usize = 1000;

/// Page size for dataset and table listings.
pub const METADATA_PAGE_SIZE: usize = 1000;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

/// Default query timeout as Duration.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS);

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Timeout for a single upstream HTTP call.
pub const UPSTREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest wait the health endpoint will honour.
pub const MAX_HEALTH_WAIT_SECS: u64 = 30;

// =============================================================================
// Result Size Constants
// =============================================================================

/// Default maximum result rows.
pub const DEFAULT_MAX_RESULT_ROWS: usize = 10_000;

/// Default maximum query length in bytes.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 1_000_000;

/// Default maximum request body size (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

// =============================================================================
// Search Constants
// =============================================================================

/// Default Tavily REST endpoint.
pub const DEFAULT_TAVILY_API_BASE_URL: &str = "https://api.tavily.com";

/// Default number of search results.
pub const DEFAULT_SEARCH_RESULTS: u32 = 5;

/// Upper bound on search results per request.
pub const MAX_SEARCH_RESULTS: u32 = 20;

/// Upper bound on URLs per extract request.
pub const MAX_EXTRACT_URLS: usize = 20;

// =============================================================================
// HTTP Constants
// =============================================================================

/// Default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port.
pub const DEFAULT_PORT: u16 = 8000;

// =============================================================================
// Shutdown Constants
// =============================================================================

/// Default shutdown drain timeout in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Default shutdown drain timeout as Duration.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS);

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;
