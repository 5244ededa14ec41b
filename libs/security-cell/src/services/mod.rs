pub mod access;
pub mod audit;

pub use access::{AccessControl, AccessGate};
pub use audit::AccessAuditLog;
