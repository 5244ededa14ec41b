pub mod auth;
pub mod error;

pub use auth::{Identity, Role};
pub use error::AppError;
