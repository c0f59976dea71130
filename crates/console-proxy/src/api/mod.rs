//! HTTP API module.
//!
//! Routes for creating exec instances, attaching to them over WebSocket and
//! resizing their terminals.

mod error;
pub mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::CLOSE_BAD_REQUEST;
pub use routes::create_router;
pub use state::AppState;
