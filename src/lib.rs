//! # MCP Data Gateway
//!
//! HTTP tool backends for MCP agents.
//!
//! This crate provides:
//! - **Query guard**: lexical checks that a SQL query is a single read-only
//!   statement touching only allow-listed datasets
//! - **Warehouse**: dataset/table discovery and guarded query execution on
//!   BigQuery
//! - **Search**: web search and page extraction through Tavily
//!
//! ## Architecture
//!
//! Every query passes the [`security::QueryGuard`] before the warehouse sees
//! it, and the warehouse's own dry-run report is checked again before the
//! query executes.

pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod resilience;
pub mod search;
pub mod security;
pub mod shutdown;
pub mod state;
pub mod transport;
mod upstream;
pub mod warehouse;

pub use config::Config;
pub use error::ServerError;
pub use state::AppState;
