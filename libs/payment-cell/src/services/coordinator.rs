// libs/payment-cell/src/services/coordinator.rs
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use appointment_cell::{AppointmentError, AppointmentService, AppointmentStatus, PaymentAcknowledgement};

use crate::models::{
    Payment, PaymentError, PaymentEvent, PaymentStatus, ReconciliationWarning, WarningKind,
};
use crate::services::payment::PaymentService;

const MAX_RETRY_ATTEMPTS: u32 = 3;
const WARNING_CAPACITY: usize = 500;

/// Carries settled payments over to their appointments.
///
/// Payments and appointments are written separately; this subscriber closes
/// the gap and records a warning whenever the two cannot be made to agree.
/// Events missed while lagging are recovered by rescanning the paid payments.
pub struct SettlementCoordinator {
    appointments: Arc<AppointmentService>,
    payments: Arc<PaymentService>,
    confirm_on_payment: bool,
    warnings: RwLock<VecDeque<ReconciliationWarning>>,
}

impl SettlementCoordinator {
    pub fn new(appointments: Arc<AppointmentService>, payments: Arc<PaymentService>, confirm_on_payment: bool) -> Self {
        Self {
            appointments,
            payments,
            confirm_on_payment,
            warnings: RwLock::new(VecDeque::new()),
        }
    }

    /// Newest first.
    pub async fn recent_warnings(&self, limit: usize) -> Vec<ReconciliationWarning> {
        self.warnings.read().await.iter().take(limit).cloned().collect()
    }

    pub async fn handle_event(&self, event: &PaymentEvent) -> Result<Option<ReconciliationWarning>, PaymentError> {
        match event {
            PaymentEvent::Created(payment) => {
                debug!("Payment {} created for appointment {}", payment.id, payment.appointment_id);
                Ok(None)
            }
            PaymentEvent::Settled(payment) if payment.status == PaymentStatus::Paid => {
                let warning = self.acknowledge(payment).await?;
                if let Some(warning) = &warning {
                    self.raise(warning.clone()).await;
                }
                Ok(warning)
            }
            // A failed payment leaves the appointment as it is
            PaymentEvent::Settled(_) => Ok(None),
        }
    }

    /// Records a warning raised elsewhere in reconciliation. A payment keeps
    /// at most one warning of each kind.
    pub async fn raise(&self, warning: ReconciliationWarning) {
        let mut warnings = self.warnings.write().await;
        if warnings
            .iter()
            .any(|w| w.payment_id == warning.payment_id && w.kind == warning.kind)
        {
            debug!("Warning {:?} already recorded for payment {}", warning.kind, warning.payment_id);
            return;
        }

        warn!(
            payment_id = %warning.payment_id,
            appointment_id = %warning.appointment_id,
            kind = ?warning.kind,
            "Reconciliation warning: {}",
            warning.message
        );
        warnings.push_front(warning);
        warnings.truncate(WARNING_CAPACITY);
    }

    /// Consumes the event bus until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<PaymentEvent>, mut shutdown: watch::Receiver<bool>) {
        info!("Settlement coordinator started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Settlement coordinator stopping");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(&event).await {
                            error!("Failed to reconcile payment event: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Settlement coordinator fell behind, {} payment events skipped, rescanning", skipped);
                        match self.resync().await {
                            Ok(count) => info!("Rescan reconciled {} paid payments", count),
                            Err(e) => error!("Failed to rescan paid payments: {}", e),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Payment event bus closed");
                        break;
                    }
                },
            }
        }
    }

    /// Replays the settlement of every paid payment whose appointment has not
    /// caught up. Returns how many were replayed.
    #[instrument(skip(self))]
    pub async fn resync(&self) -> Result<usize, PaymentError> {
        let mut replayed = 0;
        for payment in self.payments.paid_payments().await? {
            let behind = match self.appointments.lookup(payment.appointment_id).await {
                Ok(appointment) => match appointment.status {
                    AppointmentStatus::Pending => self.confirm_on_payment,
                    AppointmentStatus::Cancelled => true,
                    AppointmentStatus::Confirmed | AppointmentStatus::Completed => false,
                },
                Err(AppointmentError::NotFound(_)) => true,
                Err(e) => return Err(e.into()),
            };
            if !behind {
                continue;
            }

            match self.handle_event(&PaymentEvent::Settled(payment.clone())).await {
                Ok(_) => replayed += 1,
                Err(e) => error!(payment_id = %payment.id, "Failed to replay settlement: {}", e),
            }
        }
        Ok(replayed)
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id, appointment_id = %payment.appointment_id))]
    async fn acknowledge(&self, payment: &Payment) -> Result<Option<ReconciliationWarning>, PaymentError> {
        if !self.confirm_on_payment {
            return self.check_not_cancelled(payment).await;
        }

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.appointments.acknowledge_payment(payment.appointment_id).await {
                Ok(PaymentAcknowledgement::Confirmed { .. }) | Ok(PaymentAcknowledgement::Unchanged { .. }) => {
                    return Ok(None);
                }
                Ok(PaymentAcknowledgement::Cancelled { appointment }) => {
                    return Ok(Some(cancelled_warning(payment, appointment.cancellation_reason.as_deref())));
                }
                Err(AppointmentError::NotFound(_)) => {
                    return Ok(Some(missing_warning(payment)));
                }
                Err(AppointmentError::Conflict(_)) if attempt < MAX_RETRY_ATTEMPTS => {
                    warn!(
                        "Appointment changed while confirming payment, retrying attempt {}/{}",
                        attempt, MAX_RETRY_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(AppointmentError::Conflict(_)) => {
                    return Ok(Some(ReconciliationWarning::new(
                        payment,
                        WarningKind::AppointmentContended,
                        format!(
                            "Payment {} is paid but appointment {} could not be confirmed after {} attempts",
                            payment.id, payment.appointment_id, MAX_RETRY_ATTEMPTS
                        ),
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    async fn check_not_cancelled(&self, payment: &Payment) -> Result<Option<ReconciliationWarning>, PaymentError> {
        match self.appointments.lookup(payment.appointment_id).await {
            Ok(appointment) if appointment.status == AppointmentStatus::Cancelled => Ok(Some(cancelled_warning(
                payment,
                appointment.cancellation_reason.as_deref(),
            ))),
            Ok(_) => Ok(None),
            Err(AppointmentError::NotFound(_)) => Ok(Some(missing_warning(payment))),
            Err(e) => Err(e.into()),
        }
    }
}

fn cancelled_warning(payment: &Payment, reason: Option<&str>) -> ReconciliationWarning {
    ReconciliationWarning::new(
        payment,
        WarningKind::AppointmentCancelled,
        format!(
            "Payment {} settled as paid but appointment {} was already cancelled ({})",
            payment.id,
            payment.appointment_id,
            reason.unwrap_or("no reason given")
        ),
    )
}

fn missing_warning(payment: &Payment) -> ReconciliationWarning {
    ReconciliationWarning::new(
        payment,
        WarningKind::AppointmentMissing,
        format!(
            "Payment {} settled as paid but appointment {} no longer exists",
            payment.id, payment.appointment_id
        ),
    )
}
