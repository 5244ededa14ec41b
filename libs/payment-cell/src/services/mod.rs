pub mod coordinator;
pub mod events;
pub mod expiry;
pub mod mobile_money;
pub mod payment;
pub mod reconciliation;

pub use coordinator::SettlementCoordinator;
pub use events::PaymentEventBus;
pub use expiry::PaymentExpiryWorker;
pub use mobile_money::{GatewayError, MobileMoneyGateway, PushAcceptance, PushRequest, StkPushClient};
pub use payment::{normalize_phone_number, PaymentService};
pub use reconciliation::PaymentReconciliationService;
