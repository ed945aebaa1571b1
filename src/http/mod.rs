//! JSON over HTTP, scoped by company id in the path.

pub mod dto;
pub mod error;
mod handlers;
mod router;
mod state;

pub use error::{ApiError, AppError};
pub use router::create_router;
pub use state::AppState;
