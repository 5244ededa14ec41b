pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{ChangeRoleRequest, IdentityError, UserAccount};
pub use services::{IdentityService, UserDirectory};
pub use router::auth_routes;
