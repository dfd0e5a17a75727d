use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{
    BookingStatus, EntityKind, Status, StatusEvent, StatusKind, StatusMachine, Transition, TransitionKind,
    TransitionStrategy,
};
use crate::engine::{CascadeMode, Engine, EngineError};
use crate::model::Payment;
use crate::period::MINUTE_MS;

pub const PAYMENT_ON_HOLD_NOTE: &str = "Payment is on hold.";
pub const PAYMENT_REFUNDED_NOTE: &str = "Booking cancelled because the payment was refunded.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    AutoDraft,
    Pending,
    OnHold,
    Completed,
    Cancelled,
    Abandoned,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::AutoDraft => "auto-draft",
            PaymentStatus::Pending => "pending",
            PaymentStatus::OnHold => "on-hold",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Abandoned => "abandoned",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StatusKind for PaymentStatus {
    const ENTITY: EntityKind = EntityKind::Payment;
    const NEW_ENTITY: Self = PaymentStatus::AutoDraft;

    fn as_str(&self) -> &'static str {
        PaymentStatus::as_str(self)
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "auto-draft" => PaymentStatus::AutoDraft,
            "pending" => PaymentStatus::Pending,
            "on-hold" => PaymentStatus::OnHold,
            "completed" => PaymentStatus::Completed,
            "cancelled" => PaymentStatus::Cancelled,
            "abandoned" => PaymentStatus::Abandoned,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            _ => return None,
        })
    }

    fn event(kind: TransitionKind, transition: Transition<Self>) -> StatusEvent {
        match kind {
            TransitionKind::Created => StatusEvent::PaymentCreated(transition),
            TransitionKind::Changed => StatusEvent::PaymentStatusChanged(transition),
            TransitionKind::Entered => StatusEvent::PaymentEntered(transition),
        }
    }
}

pub fn payment_machine() -> StatusMachine<PaymentStatus> {
    StatusMachine::new(PaymentStatus::Completed)
        .with(Status::new(PaymentStatus::Pending, "Pending"))
        .with(Status::new(PaymentStatus::OnHold, "On Hold"))
        .with(Status::new(PaymentStatus::Completed, "Completed"))
        .with(Status::new(PaymentStatus::Cancelled, "Cancelled"))
        .with(Status::new(PaymentStatus::Abandoned, "Abandoned").system_only())
        .with(Status::new(PaymentStatus::Failed, "Failed"))
        .with(Status::new(PaymentStatus::Refunded, "Refunded"))
}

/// Moving a settled payment back into an open state. Gateways and sweeps
/// delivering such a change are reporting out of order.
pub fn is_regression(from: PaymentStatus, to: PaymentStatus) -> bool {
    matches!(from, PaymentStatus::Completed | PaymentStatus::Refunded)
        && matches!(to, PaymentStatus::Pending | PaymentStatus::OnHold)
}

/// What a payment status change does to the linked booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingCascade {
    Nothing,
    /// Confirm and announce `booking_confirmed_with_payment`.
    ConfirmWithPayment,
    SetStatus {
        status: BookingStatus,
        note: Option<&'static str>,
    },
}

/// Instant gateways confirm at authorization (`on-hold`), deferred ones only
/// at capture (`completed`), so the confirmation fires exactly once.
pub fn cascade_for(status: PaymentStatus, instant_gateway: bool) -> BookingCascade {
    match (status, instant_gateway) {
        (PaymentStatus::OnHold, true) => BookingCascade::ConfirmWithPayment,
        (PaymentStatus::OnHold, false) => BookingCascade::SetStatus {
            status: BookingStatus::Pending,
            note: Some(PAYMENT_ON_HOLD_NOTE),
        },
        (PaymentStatus::Completed, true) => BookingCascade::Nothing,
        (PaymentStatus::Completed, false) => BookingCascade::ConfirmWithPayment,
        (PaymentStatus::Abandoned, _) => BookingCascade::SetStatus {
            status: BookingStatus::Abandoned,
            note: None,
        },
        (PaymentStatus::Cancelled | PaymentStatus::Failed, _) => BookingCascade::SetStatus {
            status: BookingStatus::Cancelled,
            note: None,
        },
        (PaymentStatus::Refunded, _) => BookingCascade::SetStatus {
            status: BookingStatus::Cancelled,
            note: Some(PAYMENT_REFUNDED_NOTE),
        },
        (PaymentStatus::Pending | PaymentStatus::AutoDraft, _) => BookingCascade::Nothing,
    }
}

/// Saves the payment with its pending-expiry stamp, then logs, schedules the
/// abandonment sweep and cascades to the booking.
pub struct PaymentStrategy<'a> {
    pub engine: &'a Engine,
    pub actor_id: Option<Ulid>,
}

#[async_trait]
impl TransitionStrategy<PaymentStatus> for PaymentStrategy<'_> {
    type Entity = Payment;

    async fn commit(&self, payment: &mut Payment, transition: &Transition<PaymentStatus>) -> Result<(), EngineError> {
        let previous_expiry = payment.pending_expires_at;
        payment.status = transition.to;
        payment.pending_expires_at = (transition.to == PaymentStatus::Pending).then(|| {
            self.engine.now() + self.engine.config().pending_payment_minutes * MINUTE_MS
        });
        match self.engine.repository().save_payment(payment).await {
            Ok(version) => {
                payment.version = version;
                Ok(())
            }
            Err(e) => {
                payment.status = transition.from;
                payment.pending_expires_at = previous_expiry;
                Err(e.into())
            }
        }
    }

    async fn finalize(&self, payment: &mut Payment, transition: &Transition<PaymentStatus>) -> Result<(), EngineError> {
        let message = format!("Status changed from {} to {}.", transition.from, transition.to);
        self.engine.append_payment_log(payment, message, self.actor_id).await;

        if transition.to == PaymentStatus::Pending {
            self.engine.schedule_pending_sweep(payment.id).await;
        }

        let instant = self.engine.gateways().is_instant_gateway(&payment.gateway_id);
        let cascade = cascade_for(transition.to, instant);
        self.engine
            .cascade_to_booking(payment, cascade, self.actor_id, CascadeMode::Apply)
            .await
    }
}
