use tokio::sync::broadcast;
use tracing::debug;

use crate::models::PaymentEvent;

const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out of payment domain events.
#[derive(Clone)]
pub struct PaymentEventBus {
    sender: broadcast::Sender<PaymentEvent>,
}

impl PaymentEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: PaymentEvent) {
        // No subscribers is fine, e.g. in unit tests
        if self.sender.send(event).is_err() {
            debug!("Payment event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.sender.subscribe()
    }
}

impl Default for PaymentEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
