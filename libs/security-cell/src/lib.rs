// =====================================================================================
// SECURITY CELL - AUTHORIZATION GATE & ACCESS AUDIT
// =====================================================================================
//
// Every appointment and payment operation is decided here before a store is touched:
// - `AccessGate` is the pure role/ownership decision function
// - `AccessControl` wraps the gate and records denials and privileged actions
// - `AccessAuditLog` keeps a bounded in-memory trail for operators
//
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    AccessDenied, AccessTarget, AuditEntry, AuditOutcome, Operation,
};

pub use services::{AccessAuditLog, AccessControl, AccessGate};

pub use router::create_security_router;
