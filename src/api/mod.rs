//! HTTP surface over the live book: health, readiness, feed status, the
//! aggregated book and Prometheus metrics.

pub mod handlers;
pub mod routes;

pub use handlers::{AppState, BookResponse, StatusResponse};
pub use routes::create_router;
