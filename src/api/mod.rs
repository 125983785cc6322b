pub mod auth;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod ingresses;
pub mod router;
pub mod types;

pub use error::{ApiError, ErrorCode};
pub use router::{create_router, AppState};
