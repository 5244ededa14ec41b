// libs/payment-cell/src/services/expiry.rs
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::models::{Payment, PaymentError};
use crate::services::payment::PaymentService;

/// Periodically fails push payments whose callback never arrived.
pub struct PaymentExpiryWorker {
    payments: Arc<PaymentService>,
    sweep_interval: Duration,
}

impl PaymentExpiryWorker {
    pub fn new(payments: Arc<PaymentService>, sweep_interval: Duration) -> Self {
        Self {
            payments,
            sweep_interval: sweep_interval.max(Duration::from_secs(1)),
        }
    }

    pub async fn sweep_once(&self) -> Result<Vec<Payment>, PaymentError> {
        self.payments.expire_overdue(Utc::now()).await
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Payment expiry worker started, sweeping every {:?}", self.sweep_interval);

        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Payment expiry worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(expired) if expired.is_empty() => debug!("No overdue payments"),
                        Ok(expired) => debug!("Sweep expired {} payments", expired.len()),
                        Err(e) => error!("Payment expiry sweep failed: {}", e),
                    }
                }
            }
        }
    }
}
