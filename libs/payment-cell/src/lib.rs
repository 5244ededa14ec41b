pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    CreatePaymentRequest, MobileMoneyCallback, Payment, PaymentChannel, PaymentError, PaymentEvent,
    PaymentStatus, ReconciliationWarning, Settlement, SettlementCallback, SettlementOutcome,
    SettlePaymentRequest, WarningKind,
};
pub use router::payment_routes;
pub use services::{
    GatewayError, MobileMoneyGateway, PaymentEventBus, PaymentExpiryWorker,
    PaymentReconciliationService, PaymentService, PushAcceptance, PushRequest,
    SettlementCoordinator, StkPushClient,
};
