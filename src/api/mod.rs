//! HTTP transport — REST endpoints plus the SSE event stream.
//!
//! - `routes` — axum router and handlers
//! - `types` — request/response bodies (camelCase JSON)
//! - `error` — `ApiError` and its status-code mapping

pub mod error;
pub mod routes;
pub mod types;

pub use error::ApiError;
pub use routes::{AppState, relay_routes};
