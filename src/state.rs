//! Shared application state handed to every request handler.

use crate::config::Config;
use crate::error::ServerError;
use crate::search::{SearchProvider, TavilyClient};
use crate::security::QueryGuard;
use crate::warehouse::{BigQueryClient, QueryOptions, Warehouse};
use std::sync::Arc;

/// Configuration plus the guard and upstream clients.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub guard: Arc<QueryGuard>,
    pub warehouse: Arc<dyn Warehouse>,
    /// `None` when no search API key is configured.
    pub search: Option<Arc<dyn SearchProvider>>,
}

impl AppState {
    pub fn new(
        config: Config,
        warehouse: Arc<dyn Warehouse>,
        search: Option<Arc<dyn SearchProvider>>,
    ) -> Self {
        let guard = QueryGuard::new(config.security.allowed_datasets.clone());
        Self {
            config: Arc::new(config),
            guard: Arc::new(guard),
            warehouse,
            search,
        }
    }

    /// Build the production clients described by `config`.
    pub fn from_config(config: Config) -> Result<Self, ServerError> {
        let warehouse: Arc<dyn Warehouse> =
            Arc::new(BigQueryClient::new(config.bigquery.clone())?);
        let search = TavilyClient::from_config(&config.search)?
            .map(|client| Arc::new(client) as Arc<dyn SearchProvider>);
        Ok(Self::new(config, warehouse, search))
    }

    /// Limits for executed queries.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            max_bytes_billed: self.config.bigquery.max_bytes_billed,
            timeout: self.config.bigquery.query_timeout,
            max_rows: self.config.bigquery.max_result_rows,
        }
    }

    pub fn search_provider(&self) -> Result<&Arc<dyn SearchProvider>, ServerError> {
        self.search
            .as_ref()
            .ok_or_else(|| ServerError::not_configured("Web search is not configured"))
    }
}
