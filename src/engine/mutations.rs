use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::status::{
    cascade_for, holds_time_slot, is_regression, BookingStatus, BookingStrategy, EntityKind, PaymentStatus,
    PaymentStrategy,
};

use super::{CascadeMode, ConflictGuard, Engine, EngineError, ValidationError};

/// Result of one abandonment sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Abandoned,
    /// Payment left `pending`, is not yet expired, or no longer exists.
    Skipped,
}

impl SweepOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SweepOutcome::Abandoned => "abandoned",
            SweepOutcome::Skipped => "skipped",
        }
    }
}

impl Engine {
    /// Manual booking status change, e.g. an admin save.
    ///
    /// Claiming a slot (`pending`, `confirmed`) runs the conflict guard under
    /// the calendar locks of every reservation, so the check and the commit
    /// cannot interleave with another booking claiming the same slot.
    pub async fn request_booking_status_change(
        &self,
        booking_id: Ulid,
        new_status: &str,
        actor_id: Option<Ulid>,
    ) -> Result<Booking, EngineError> {
        let to = self.bookings.resolve(new_status)?;
        if !self.bookings.is_manual(to) {
            return Err(ValidationError::NotManuallyAssignable {
                entity: EntityKind::Booking,
                status: to.as_str().to_string(),
            }
            .into());
        }

        let _booking_guard = self.lock_entity(booking_id).await;
        let mut booking = self
            .repository()
            .find_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        let from = booking.status;
        if from == to {
            debug!(%booking_id, status = %to, "booking already in requested status");
            return Ok(booking);
        }
        if from == BookingStatus::AutoDraft && !matches!(to, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(ValidationError::InvalidTransition {
                entity: EntityKind::Booking,
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        let _calendar_guards = if holds_time_slot(to) {
            self.lock_calendars(booking.reservations.iter().map(Reservation::calendar))
                .await
        } else {
            Vec::new()
        };
        ConflictGuard::new(self).check(&booking, to).await?;

        let strategy = BookingStrategy {
            engine: self,
            actor_id,
        };
        self.bookings
            .transition(&strategy, &mut booking, booking_id, from, to, self.events())
            .await?;
        info!(%booking_id, %from, %to, "booking status changed");
        Ok(booking)
    }

    /// Payment status change from an admin, a gateway callback or the sweep.
    /// Cascades to the linked booking. Repeating the current status commits
    /// nothing but completes a booking cascade that an earlier call left
    /// unfinished, so a failed callback can simply be retried.
    pub async fn apply_payment_status_change(
        &self,
        payment_id: Ulid,
        new_status: &str,
        context: PaymentChangeContext,
    ) -> Result<Payment, EngineError> {
        let to = self.payments.resolve(new_status)?;
        if context.source == ChangeSource::Admin && !self.payments.is_manual(to) {
            return Err(ValidationError::NotManuallyAssignable {
                entity: EntityKind::Payment,
                status: to.as_str().to_string(),
            }
            .into());
        }

        let _payment_guard = self.lock_entity(payment_id).await;
        let mut payment = self
            .repository()
            .find_payment(payment_id)
            .await?
            .ok_or(EngineError::NotFound(payment_id))?;
        let from = payment.status;
        if context.source != ChangeSource::Admin && is_regression(from, to) {
            warn!(%payment_id, %from, %to, source = ?context.source, "out-of-order payment update rejected");
            return Err(ValidationError::InvalidTransition {
                entity: EntityKind::Payment,
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        if from == to {
            // A redelivered status may follow an attempt whose booking update failed.
            let instant = self.gateways().is_instant_gateway(&payment.gateway_id);
            self.cascade_to_booking(&payment, cascade_for(to, instant), context.actor_id, CascadeMode::Resume)
                .await?;
            return Ok(payment);
        }

        self.transition_payment(&mut payment, to, context.actor_id).await?;
        Ok(payment)
    }

    /// Abandon a payment that is still `pending` past its expiry. Anything
    /// else is a no-op, so late or duplicate sweeps are harmless.
    pub async fn sweep_pending_payment(&self, payment_id: Ulid) -> Result<SweepOutcome, EngineError> {
        let _payment_guard = self.lock_entity(payment_id).await;
        let outcome = match self.repository().find_payment(payment_id).await? {
            Some(mut payment) if self.is_expired_pending(&payment) => {
                self.transition_payment(&mut payment, PaymentStatus::Abandoned, None)
                    .await?;
                info!(%payment_id, "abandoned expired pending payment");
                SweepOutcome::Abandoned
            }
            Some(payment) => {
                debug!(%payment_id, status = %payment.status, "sweep skipped");
                SweepOutcome::Skipped
            }
            None => {
                debug!(%payment_id, "sweep skipped, payment gone");
                SweepOutcome::Skipped
            }
        };
        metrics::counter!(crate::observability::SWEEPS_TOTAL, "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }

    /// Sweep every pending payment that has expired by now. Per-payment
    /// failures are logged and skipped. Returns how many were abandoned.
    pub async fn sweep_expired_payments(&self) -> Result<usize, EngineError> {
        let expired = self.repository().find_expired_pending_payments(self.now()).await?;
        let mut abandoned = 0;
        for payment_id in expired {
            match self.sweep_pending_payment(payment_id).await {
                Ok(SweepOutcome::Abandoned) => abandoned += 1,
                Ok(SweepOutcome::Skipped) => {}
                Err(e) => warn!(%payment_id, error = %e, "sweep failed"),
            }
        }
        Ok(abandoned)
    }

    fn is_expired_pending(&self, payment: &Payment) -> bool {
        payment.status == PaymentStatus::Pending && payment.pending_expires_at.is_some_and(|t| t <= self.now())
    }

    /// Caller holds the payment lock.
    async fn transition_payment(
        &self,
        payment: &mut Payment,
        to: PaymentStatus,
        actor_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let strategy = PaymentStrategy {
            engine: self,
            actor_id,
        };
        let (payment_id, from) = (payment.id, payment.status);
        let changed = self
            .payments
            .transition(&strategy, payment, payment_id, from, to, self.events())
            .await?;
        if changed.is_some() {
            info!(%payment_id, %from, %to, "payment status changed");
        }
        Ok(())
    }
}
