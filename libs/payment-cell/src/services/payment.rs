// libs/payment-cell/src/services/payment.rs
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::{AppointmentService, AppointmentStatus};
use security_cell::{AccessControl, Operation};
use shared_config::{AmountMatchPolicy, AppConfig};
use shared_database::{Repository, StoreError, Versioned};
use shared_models::auth::Identity;

use crate::models::{
    CreatePaymentRequest, Payment, PaymentChannel, PaymentError, PaymentEvent, PaymentStatus,
    Settlement, SettlementOutcome, EXPIRED_REFERENCE, PROVISIONAL_TRANSACTION_PREFIX,
};
use crate::services::events::PaymentEventBus;

/// Safaricom subscriber numbers in international form.
static MOBILE_MONEY_MSISDN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^254(7|1)\d{8}$").expect("MSISDN pattern is valid"));

const MAX_WRITE_ATTEMPTS: u32 = 3;

/// The Payment Store.
pub struct PaymentService {
    repository: Arc<dyn Repository<Payment>>,
    appointments: Arc<AppointmentService>,
    access: AccessControl,
    config: Arc<AppConfig>,
    events: PaymentEventBus,
}

impl PaymentService {
    pub fn new(
        repository: Arc<dyn Repository<Payment>>,
        appointments: Arc<AppointmentService>,
        access: AccessControl,
        config: Arc<AppConfig>,
        events: PaymentEventBus,
    ) -> Self {
        Self {
            repository,
            appointments,
            access,
            config,
            events,
        }
    }

    pub fn events(&self) -> &PaymentEventBus {
        &self.events
    }

    /// Records a new `Pending` payment against an appointment.
    #[instrument(skip(self, caller, request), fields(caller_id = %caller.user_id, appointment_id = %request.appointment_id))]
    pub async fn create(&self, caller: &Identity, request: CreatePaymentRequest) -> Result<Payment, PaymentError> {
        let appointment = self.appointments.lookup(request.appointment_id).await?;

        self.access
            .check(
                caller,
                Operation::InitiatePayment,
                &appointment.access_target(),
                Some(appointment.id),
            )
            .await?;

        if appointment.status == AppointmentStatus::Cancelled {
            return Err(PaymentError::Validation(format!(
                "Appointment {} is cancelled and cannot be paid for",
                appointment.id
            )));
        }

        self.validate_amount(caller, request.amount, appointment.total_amount)?;

        let phone_number = match request.channel {
            PaymentChannel::MobileMoney => {
                // The gateway charges whole units only
                if request.amount <= Decimal::ZERO || !request.amount.fract().is_zero() {
                    return Err(PaymentError::Validation(format!(
                        "Mobile money amounts must be a positive whole number, got {}",
                        request.amount
                    )));
                }
                let raw = request.phone_number.as_deref().ok_or_else(|| {
                    PaymentError::Validation("A phone number is required for mobile money".to_string())
                })?;
                Some(normalize_phone_number(raw)?)
            }
            PaymentChannel::Card => None,
        };

        // Not enforced by the table itself, two racing creates can both pass
        let active = self
            .payments_for_appointment(appointment.id)
            .await?
            .into_iter()
            .find(|p| p.status != PaymentStatus::Failed);
        if let Some(active) = active {
            return Err(PaymentError::Conflict(format!(
                "Appointment {} already has an active payment {} ({})",
                appointment.id, active.id, active.status
            )));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let expires_at = match request.channel {
            PaymentChannel::MobileMoney => Some(self.push_deadline(now)?),
            PaymentChannel::Card => None,
        };

        let payment = Payment {
            id,
            appointment_id: appointment.id,
            user_id: appointment.user_id,
            doctor_id: appointment.doctor_id,
            amount: request.amount,
            status: PaymentStatus::Pending,
            channel: request.channel,
            transaction_id: format!("{}{}", PROVISIONAL_TRANSACTION_PREFIX, id.simple()),
            settlement_reference: None,
            phone_number,
            payment_date: now,
            settled_at: None,
            expires_at,
            created_by: caller.user_id,
        };

        let stored = self.repository.insert(payment).await?;
        info!(
            payment_id = %stored.record.id,
            "Payment of {} created via {}",
            stored.record.amount, stored.record.channel
        );
        self.events.publish(PaymentEvent::Created(stored.record.clone()));

        Ok(stored.record)
    }

    /// Applies a terminal outcome. Repeating the current outcome is a no-op;
    /// overturning a final outcome is a conflict.
    #[instrument(skip(self, settlement_reference))]
    pub async fn mark_settled(
        &self,
        payment_id: Uuid,
        outcome: SettlementOutcome,
        settlement_reference: &str,
    ) -> Result<Settlement, PaymentError> {
        let settlement_reference = settlement_reference.trim();
        if settlement_reference.is_empty() {
            return Err(PaymentError::Validation("A settlement reference is required".to_string()));
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.load(payment_id).await?;
            let payment = &current.record;

            match payment.status {
                status if status == outcome.status() => {
                    debug!("Payment {} already {}, ignoring repeat settlement", payment_id, status);
                    return Ok(Settlement {
                        payment: current.record,
                        changed: false,
                    });
                }
                PaymentStatus::Paid | PaymentStatus::Failed => {
                    warn!(
                        "Refusing to settle payment {} as {}: already {}",
                        payment_id, outcome, payment.status
                    );
                    return Err(PaymentError::Conflict(format!(
                        "Payment {} is already {} and cannot become {}",
                        payment_id, payment.status, outcome
                    )));
                }
                PaymentStatus::Pending => {}
            }

            let mut updated = payment.clone();
            updated.status = outcome.status();
            updated.settlement_reference = Some(settlement_reference.to_string());
            updated.settled_at = Some(Utc::now());
            if updated.has_provisional_transaction_id() && outcome == SettlementOutcome::Paid {
                updated.transaction_id = settlement_reference.to_string();
            }

            match self
                .repository
                .compare_and_swap(payment_id, current.version, updated)
                .await
            {
                Ok(stored) => {
                    info!(payment_id = %payment_id, "Payment settled as {}", outcome);
                    self.events.publish(PaymentEvent::Settled(stored.record.clone()));
                    return Ok(Settlement {
                        payment: stored.record,
                        changed: true,
                    });
                }
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(
                        "Settlement of {} raced another write, retrying attempt {}/{}",
                        payment_id, attempt, MAX_WRITE_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PaymentError::Conflict(format!(
            "Payment {} kept changing during settlement",
            payment_id
        )))
    }

    /// Settlement reported by a caller rather than a gateway.
    ///
    /// Patients may only report card charges; a push payment is only settled
    /// by its gateway callback, or by an administrator.
    #[instrument(skip(self, caller, settlement_reference), fields(caller_id = %caller.user_id))]
    pub async fn settle_as(
        &self,
        caller: &Identity,
        payment_id: Uuid,
        outcome: SettlementOutcome,
        settlement_reference: &str,
    ) -> Result<Settlement, PaymentError> {
        let current = self.load(payment_id).await?;

        self.access
            .check(caller, Operation::SettlePayment, &current.record.access_target(), Some(payment_id))
            .await?;

        if current.record.channel != PaymentChannel::Card && !caller.is_admin() {
            return Err(PaymentError::Validation(format!(
                "Payment {} is settled by its {} callback",
                payment_id, current.record.channel
            )));
        }

        self.mark_settled(payment_id, outcome, settlement_reference).await
    }

    /// Swaps the placeholder for the gateway's own reference once a push is accepted.
    pub async fn attach_transaction_id(&self, payment_id: Uuid, transaction_id: &str) -> Result<Payment, PaymentError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.load(payment_id).await?;
            if current.record.status != PaymentStatus::Pending {
                // Settled before the gateway answered, keep what we have
                return Ok(current.record);
            }

            let mut updated = current.record.clone();
            updated.transaction_id = transaction_id.to_string();

            match self
                .repository
                .compare_and_swap(payment_id, current.version, updated)
                .await
            {
                Ok(stored) => return Ok(stored.record),
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(
                        "Attaching {} to payment {} raced another write, retrying attempt {}/{}",
                        transaction_id, payment_id, attempt, MAX_WRITE_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PaymentError::Conflict(format!(
            "Payment {} kept changing while attaching {}",
            payment_id, transaction_id
        )))
    }

    /// Admin-only hard delete.
    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn delete(&self, payment_id: Uuid, caller: &Identity) -> Result<Payment, PaymentError> {
        let current = self.load(payment_id).await?;

        self.access
            .check(caller, Operation::Delete, &current.record.access_target(), Some(payment_id))
            .await?;

        let deleted = self
            .repository
            .delete(payment_id)
            .await?
            .ok_or_else(|| PaymentError::payment_not_found(payment_id))?;

        info!(payment_id = %payment_id, "Payment deleted");
        Ok(deleted)
    }

    pub async fn get_by_id(&self, payment_id: Uuid, caller: &Identity) -> Result<Payment, PaymentError> {
        let current = self.load(payment_id).await?;

        self.access
            .check(caller, Operation::View, &current.record.access_target(), Some(payment_id))
            .await?;

        Ok(current.record)
    }

    /// Whatever the caller is allowed to see.
    pub async fn list_for(&self, caller: &Identity) -> Result<Vec<Payment>, PaymentError> {
        let payments = self.all_payments().await?;
        Ok(self.access.filter_visible(caller, payments, Payment::access_target))
    }

    pub async fn list_by_appointment(&self, caller: &Identity, appointment_id: Uuid) -> Result<Vec<Payment>, PaymentError> {
        let payments = self.payments_for_appointment(appointment_id).await?;
        Ok(self.access.filter_visible(caller, payments, Payment::access_target))
    }

    /// Everything, for administrators. Anyone else gets an empty list.
    pub async fn list_all(&self, caller: &Identity) -> Result<Vec<Payment>, PaymentError> {
        if !caller.is_admin() {
            return Ok(Vec::new());
        }
        self.all_payments().await
    }

    /// Finds a payment by a gateway reference or its own id.
    pub async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>, PaymentError> {
        Ok(self
            .all_payments()
            .await?
            .into_iter()
            .find(|p| p.transaction_id == transaction_id))
    }

    /// Every paid payment, unscoped. Used to catch up on missed settlement events.
    pub async fn paid_payments(&self) -> Result<Vec<Payment>, PaymentError> {
        Ok(self
            .all_payments()
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Paid)
            .collect())
    }

    /// Unscoped read for reconciliation.
    pub async fn lookup(&self, payment_id: Uuid) -> Result<Payment, PaymentError> {
        Ok(self.load(payment_id).await?.record)
    }

    /// Fails every push payment whose callback did not arrive in time.
    #[instrument(skip(self))]
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Payment>, PaymentError> {
        let overdue: Vec<Payment> = self
            .all_payments()
            .await?
            .into_iter()
            .filter(|p| p.channel == PaymentChannel::MobileMoney && p.is_overdue(now))
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for payment in overdue {
            match self
                .mark_settled(payment.id, SettlementOutcome::Failed, EXPIRED_REFERENCE)
                .await
            {
                Ok(settlement) if settlement.changed => {
                    warn!(payment_id = %payment.id, "Mobile money payment expired without a callback");
                    expired.push(settlement.payment);
                }
                Ok(_) => {}
                // A callback won the race, nothing to expire
                Err(PaymentError::Conflict(msg)) => debug!("Skipping expiry: {}", msg),
                Err(e) => return Err(e),
            }
        }

        if !expired.is_empty() {
            info!("Expired {} overdue mobile money payments", expired.len());
        }
        Ok(expired)
    }

    fn push_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, PaymentError> {
        let minutes = self.config.mobile_money_timeout_minutes;
        Some(minutes)
            .filter(|minutes| *minutes > 0)
            .and_then(Duration::try_minutes)
            .and_then(|timeout| now.checked_add_signed(timeout))
            .ok_or_else(|| {
                PaymentError::Internal(format!("Mobile money timeout of {} minutes is out of range", minutes))
            })
    }

    fn validate_amount(&self, caller: &Identity, amount: Decimal, total_amount: Decimal) -> Result<(), PaymentError> {
        if amount < Decimal::ZERO {
            return Err(PaymentError::Validation("Payment amount cannot be negative".to_string()));
        }

        let matches = match self.config.amount_policy {
            AmountMatchPolicy::Exact => amount == total_amount,
            AmountMatchPolicy::Tolerance(max_difference) => (amount - total_amount).abs() <= max_difference,
            AmountMatchPolicy::AdminOverride => caller.is_admin() || amount == total_amount,
        };

        if !matches {
            return Err(PaymentError::Validation(format!(
                "Payment amount {} does not match the appointment total {}",
                amount, total_amount
            )));
        }
        Ok(())
    }

    async fn load(&self, payment_id: Uuid) -> Result<Versioned<Payment>, PaymentError> {
        self.repository
            .get(payment_id)
            .await?
            .ok_or_else(|| PaymentError::payment_not_found(payment_id))
    }

    async fn all_payments(&self) -> Result<Vec<Payment>, PaymentError> {
        let mut payments: Vec<Payment> = self
            .repository
            .list()
            .await?
            .into_iter()
            .map(|row| row.record)
            .collect();
        payments.sort_by_key(|p| p.payment_date);
        Ok(payments)
    }

    async fn payments_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Payment>, PaymentError> {
        Ok(self
            .all_payments()
            .await?
            .into_iter()
            .filter(|p| p.appointment_id == appointment_id)
            .collect())
    }
}

/// Accepts `07XXXXXXXX`, `01XXXXXXXX`, `+2547XXXXXXXX` and `2547XXXXXXXX`
/// with spaces or dashes, and returns the `2547XXXXXXXX` form.
pub fn normalize_phone_number(raw: &str) -> Result<String, PaymentError> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    let international = match digits.strip_prefix('0') {
        Some(local) => format!("254{}", local),
        None => digits.to_string(),
    };

    if !MOBILE_MONEY_MSISDN.is_match(&international) {
        return Err(PaymentError::Validation(format!(
            "'{}' is not a valid mobile money number",
            raw
        )));
    }

    Ok(international)
}
