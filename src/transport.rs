//! HTTP transport: router construction and the server loop.

use crate::config::{non_empty, parse_flag, parse_var, Lookup};
use crate::constants::{
    DEFAULT_HOST, DEFAULT_MAX_BODY_SIZE, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::error::ServerError;
use crate::handlers;
use crate::shutdown::SharedShutdownController;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Enable CORS.
    pub enable_cors: bool,

    /// Allowed origins for CORS (empty means all).
    pub cors_origins: Vec<String>,

    /// Enable request tracing via tower-http TraceLayer.
    pub enable_tracing: bool,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            enable_cors: true,
            cors_origins: Vec::new(),
            enable_tracing: true,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl HttpConfig {
    /// Read the `APP_*` variables.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ServerError> {
        let defaults = Self::default();

        let cors_origins = non_empty(lookup, "APP_CORS_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let request_timeout_seconds = parse_var(
            lookup,
            "APP_REQUEST_TIMEOUT",
            defaults.request_timeout_seconds,
        )?;
        if request_timeout_seconds == 0 {
            return Err(ServerError::config(
                "APP_REQUEST_TIMEOUT must be greater than zero",
            ));
        }

        Ok(Self {
            host: non_empty(lookup, "APP_HOST").unwrap_or(defaults.host),
            port: parse_var(lookup, "APP_PORT", defaults.port)?,
            enable_cors: parse_flag(lookup, "APP_CORS", defaults.enable_cors)?,
            cors_origins,
            enable_tracing: parse_flag(lookup, "APP_TRACING", defaults.enable_tracing)?,
            request_timeout_seconds,
            max_body_size: parse_var(lookup, "APP_MAX_BODY_SIZE", defaults.max_body_size)?,
        })
    }

    /// `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Build the application router with the configured middleware.
pub fn build_router(state: AppState, config: &HttpConfig) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/bigquery/list_datasets", get(handlers::list_datasets))
        .route("/bigquery/allowed_datasets", get(handlers::allowed_datasets))
        .route("/bigquery/tables", get(handlers::list_tables))
        .route(
            "/bigquery/tables/{dataset_id}/{table_id}",
            get(handlers::describe_table),
        )
        .route("/bigquery/query", post(handlers::run_query))
        .route("/search/tavily/search", post(handlers::web_search))
        .route("/search/tavily/extract", post(handlers::extract_pages))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_seconds),
        ));

    if config.enable_tracing {
        router = router.layer(TraceLayer::new_for_http());
    }

    if config.enable_cors {
        router = router.layer(cors_layer(&config.cors_origins));
    }

    router
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let mut parsed = Vec::new();
        for origin in origins {
            match HeaderValue::from_str(origin) {
                Ok(value) => parsed.push(value),
                Err(e) => warn!("Ignoring invalid CORS origin '{}': {}", origin, e),
            }
        }
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

async fn track_in_flight(
    State(controller): State<SharedShutdownController>,
    request: Request,
    next: Next,
) -> Response {
    let _in_flight = controller.begin_request();
    next.run(request).await
}

/// Serve until shutdown is signalled, then drain in-flight requests.
///
/// Connections still open after the drain timeout are dropped.
pub async fn serve(
    state: AppState,
    config: &HttpConfig,
    controller: SharedShutdownController,
) -> Result<(), anyhow::Error> {
    let app = build_router(state, config).layer(middleware::from_fn_with_state(
        controller.clone(),
        track_in_flight,
    ));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("HTTP server listening on http://{}", addr);
    if config.enable_tracing {
        info!("Request tracing enabled");
    }

    let mut stop_accepting = controller.signal();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop_accepting.recv().await;
                info!("HTTP server received shutdown signal");
            })
            .await
    });

    let mut shutdown = controller.signal();
    tokio::select! {
        finished = &mut server => return Ok(finished??),
        _ = shutdown.recv() => {}
    }

    if !controller.drain_requests().await {
        server.abort();
        warn!("Dropped connections still open after the drain timeout");
        return Ok(());
    }

    match tokio::time::timeout(Duration::from_secs(1), &mut server).await {
        Ok(finished) => finished??,
        Err(_) => {
            server.abort();
            warn!("Closed idle connections after shutdown");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
        assert!(config.enable_cors);
        assert!(config.enable_tracing);
        assert_eq!(config.request_timeout_seconds, 120);
        assert_eq!(config.max_body_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_http_config_from_lookup() {
        let lookup = lookup_from(&[
            ("APP_HOST", "0.0.0.0"),
            ("APP_PORT", "9000"),
            ("APP_CORS", "false"),
            ("APP_CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("APP_TRACING", "0"),
            ("APP_REQUEST_TIMEOUT", "15"),
        ]);
        let config = HttpConfig::from_lookup(&lookup).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert!(!config.enable_cors);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(!config.enable_tracing);
        assert_eq!(config.request_timeout_seconds, 15);
    }

    #[test]
    fn test_http_config_rejects_bad_values() {
        let lookup = lookup_from(&[("APP_PORT", "eighty")]);
        assert!(matches!(
            HttpConfig::from_lookup(&lookup),
            Err(ServerError::Config(_))
        ));

        let lookup = lookup_from(&[("APP_PORT", "70000")]);
        assert!(HttpConfig::from_lookup(&lookup).is_err());

        let lookup = lookup_from(&[("APP_CORS", "maybe")]);
        assert!(HttpConfig::from_lookup(&lookup).is_err());

        let lookup = lookup_from(&[("APP_REQUEST_TIMEOUT", "0")]);
        assert!(HttpConfig::from_lookup(&lookup).is_err());
    }
}
