//! The HTTP/JSON v1 surface: request/response DTOs, error mapping and the
//! axum router wiring the engine to the outside world.

pub mod http;
pub mod types;

pub use http::{AppState, router};
pub use types::{ApiError, ErrorBody};
