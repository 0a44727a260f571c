//! Configuration management for the data gateway.
//!
//! Configuration is loaded from environment variables following the 12-factor
//! app pattern. [`Config::from_lookup`] takes the variable source as a function
//! so tests never touch the process environment.

use crate::constants::{
    ALLOWED_STATEMENTS, DEFAULT_BIGQUERY_API_BASE_URL, DEFAULT_MAX_BYTES_BILLED,
    DEFAULT_MAX_QUERY_LENGTH, DEFAULT_MAX_RESULT_ROWS, DEFAULT_QUERY_TIMEOUT_SECS,
    DEFAULT_TAVILY_API_BASE_URL,
};
use crate::error::ServerError;
use crate::security::{validate_location, validate_project_id, DatasetAllowList};
use crate::shutdown::ShutdownConfig;
use crate::transport::HttpConfig;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Source of configuration variables.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Warehouse connection configuration
    pub bigquery: BigQueryConfig,

    /// Web search configuration
    pub search: SearchConfig,

    /// Query guard configuration
    pub security: SecurityConfig,

    /// HTTP server configuration
    pub http: HttpConfig,

    /// Shutdown behaviour
    pub shutdown: ShutdownConfig,
}

/// BigQuery configuration.
#[derive(Clone)]
pub struct BigQueryConfig {
    /// Project that runs query jobs and owns the listed datasets
    pub project_id: String,

    /// REST endpoint, without trailing slash
    pub api_base_url: String,

    /// OAuth bearer token; requests are unauthenticated when absent
    pub access_token: Option<String>,

    /// Processing location for jobs (e.g. `US`, `europe-west2`)
    pub location: Option<String>,

    /// `maximumBytesBilled` cap applied to every executed query
    pub max_bytes_billed: u64,

    /// How long to wait for a query to complete
    pub query_timeout: Duration,

    /// Maximum rows returned per query
    pub max_result_rows: usize,
}

impl std::fmt::Debug for BigQueryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryConfig")
            .field("project_id", &self.project_id)
            .field("api_base_url", &self.api_base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("location", &self.location)
            .field("max_bytes_billed", &self.max_bytes_billed)
            .field("query_timeout", &self.query_timeout)
            .field("max_result_rows", &self.max_result_rows)
            .finish()
    }
}

/// Web search configuration.
#[derive(Clone)]
pub struct SearchConfig {
    /// Tavily API key; search routes are disabled without it
    pub tavily_api_key: Option<String>,

    /// Tavily REST endpoint, without trailing slash
    pub tavily_api_base_url: String,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field(
                "tavily_api_key",
                &self.tavily_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("tavily_api_base_url", &self.tavily_api_base_url)
            .finish()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            tavily_api_base_url: DEFAULT_TAVILY_API_BASE_URL.to_string(),
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Datasets queries may reference
    pub allowed_datasets: DatasetAllowList,

    /// Statement types the warehouse dry run may report
    pub allowed_statements: Vec<String>,

    /// Maximum query length (bytes)
    pub max_query_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_datasets: DatasetAllowList::Unrestricted,
            allowed_statements: ALLOWED_STATEMENTS.iter().map(|s| s.to_string()).collect(),
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
        }
    }
}

impl BigQueryConfig {
    /// Defaults for everything except the project.
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_base_url: DEFAULT_BIGQUERY_API_BASE_URL.to_string(),
            access_token: None,
            location: None,
            max_bytes_billed: DEFAULT_MAX_BYTES_BILLED,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `BQ_PROJECT_ID`: BigQuery project id
    ///
    /// ## Optional
    /// - `BQ_ALLOWED_DATASETS`: comma-separated dataset names; unset, empty or
    ///   `*` allows every dataset
    /// - `BQ_MAX_BYTES_BILLED`: per-query billing cap (default: 1073741824)
    /// - `BQ_ACCESS_TOKEN`: OAuth bearer token
    /// - `BQ_API_BASE_URL`: REST endpoint override
    /// - `BQ_LOCATION`: job processing location
    /// - `BQ_QUERY_TIMEOUT`: query timeout in seconds (default: 60)
    /// - `BQ_MAX_ROWS`: maximum result rows (default: 10000)
    /// - `BQ_MAX_QUERY_LENGTH`: maximum query length in bytes (default: 1000000)
    /// - `TAVILY_API_KEY`: enables the search routes
    /// - `TAVILY_API_BASE_URL`: Tavily endpoint override
    /// - `APP_*`: see [`HttpConfig`] and [`ShutdownConfig`]
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(&|name: &str| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ServerError> {
        let project_id = non_empty(lookup, "BQ_PROJECT_ID")
            .ok_or_else(|| ServerError::config("BQ_PROJECT_ID environment variable is required"))?;
        validate_project_id(&project_id)
            .map_err(|e| ServerError::config(format!("BQ_PROJECT_ID: {e}")))?;

        let location = non_empty(lookup, "BQ_LOCATION");
        if let Some(location) = &location {
            validate_location(location)
                .map_err(|e| ServerError::config(format!("BQ_LOCATION: {e}")))?;
        }

        let allowed_datasets = match lookup("BQ_ALLOWED_DATASETS") {
            Some(raw) => raw
                .parse::<DatasetAllowList>()
                .map_err(|e| ServerError::config(format!("BQ_ALLOWED_DATASETS: {e}")))?,
            None => DatasetAllowList::Unrestricted,
        };

        let max_result_rows = parse_var(lookup, "BQ_MAX_ROWS", DEFAULT_MAX_RESULT_ROWS)?;
        if max_result_rows == 0 {
            return Err(ServerError::config("BQ_MAX_ROWS must be greater than zero"));
        }

        let max_query_length = parse_var(lookup, "BQ_MAX_QUERY_LENGTH", DEFAULT_MAX_QUERY_LENGTH)?;
        if max_query_length == 0 {
            return Err(ServerError::config(
                "BQ_MAX_QUERY_LENGTH must be greater than zero",
            ));
        }

        let bigquery = BigQueryConfig {
            project_id,
            api_base_url: base_url(lookup, "BQ_API_BASE_URL", DEFAULT_BIGQUERY_API_BASE_URL),
            access_token: non_empty(lookup, "BQ_ACCESS_TOKEN"),
            location,
            max_bytes_billed: parse_var(lookup, "BQ_MAX_BYTES_BILLED", DEFAULT_MAX_BYTES_BILLED)?,
            query_timeout: Duration::from_secs(parse_var(
                lookup,
                "BQ_QUERY_TIMEOUT",
                DEFAULT_QUERY_TIMEOUT_SECS,
            )?),
            max_result_rows,
        };

        let search = SearchConfig {
            tavily_api_key: non_empty(lookup, "TAVILY_API_KEY"),
            tavily_api_base_url: base_url(
                lookup,
                "TAVILY_API_BASE_URL",
                DEFAULT_TAVILY_API_BASE_URL,
            ),
        };

        Ok(Config {
            bigquery,
            search,
            security: SecurityConfig {
                allowed_datasets,
                max_query_length,
                ..SecurityConfig::default()
            },
            http: HttpConfig::from_lookup(lookup)?,
            shutdown: ShutdownConfig::from_lookup(lookup)?,
        })
    }

    /// Whether the search routes are enabled.
    pub fn search_enabled(&self) -> bool {
        self.search.tavily_api_key.is_some()
    }
}

/// A variable's trimmed value, treating blank as unset.
pub(crate) fn non_empty(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a variable, falling back to `default` when unset.
///
/// A value that does not parse is an error rather than a silent default.
pub(crate) fn parse_var<T>(lookup: Lookup<'_>, name: &str, default: T) -> Result<T, ServerError>
where
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup, name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ServerError::config(format!("{name}: invalid value '{raw}': {e}"))),
        None => Ok(default),
    }
}

/// Parse a boolean flag (`true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`).
pub(crate) fn parse_flag(lookup: Lookup<'_>, name: &str, default: bool) -> Result<bool, ServerError> {
    match non_empty(lookup, name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ServerError::config(format!(
                "{name}: invalid boolean '{raw}'"
            ))),
        },
        None => Ok(default),
    }
}

fn base_url(lookup: Lookup<'_>, name: &str, default: &str) -> String {
    non_empty(lookup, name)
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
