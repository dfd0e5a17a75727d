mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{busy_set, peak_usage, saturated_periods, AvailabilityChecker, BusySlot};
pub use conflict::ConflictGuard;
pub use error::{ConflictError, EngineError, ValidationError};
pub use mutations::SweepOutcome;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::limits::MAX_LOG_MESSAGE_LEN;
use crate::model::*;
use crate::ports::{Clock, EventBus, GatewayRegistry, Repository, Scheduler, SweepTask};
use crate::status::{
    booking_machine, holds_time_slot, payment_machine, BookingCascade, BookingStatus, BookingStrategy, PaymentStatus,
    StatusEvent, StatusMachine,
};

type SharedLock = Arc<Mutex<()>>;

/// How a payment cascade treats the linked booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CascadeMode {
    /// Fresh payment transition: apply the table as is.
    Apply,
    /// Redelivered payment status: finish what an earlier attempt left undone,
    /// never step a booking backwards.
    Resume,
}

/// The booking already reflects the cascade, or has moved past it.
fn cascade_settled(current: BookingStatus, target: BookingStatus) -> bool {
    current == target || (target == BookingStatus::Pending && current == BookingStatus::Confirmed)
}

/// Host-provided collaborators.
#[derive(Clone)]
pub struct Ports {
    pub repository: Arc<dyn Repository>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub events: Arc<dyn EventBus>,
    pub gateways: Arc<dyn GatewayRegistry>,
}

pub struct Engine {
    ports: Ports,
    config: EngineConfig,
    pub(super) bookings: StatusMachine<BookingStatus>,
    pub(super) payments: StatusMachine<PaymentStatus>,
    /// Booking and payment ids share one map; ULIDs don't collide.
    entity_locks: DashMap<Ulid, SharedLock>,
    calendar_locks: DashMap<CalendarKey, SharedLock>,
}

impl Engine {
    pub fn new(ports: Ports, config: EngineConfig) -> Self {
        Self::with_machines(ports, config, booking_machine(), payment_machine())
    }

    /// Use custom status registries, e.g. with host-specific labels.
    pub fn with_machines(
        ports: Ports,
        config: EngineConfig,
        bookings: StatusMachine<BookingStatus>,
        payments: StatusMachine<PaymentStatus>,
    ) -> Self {
        Self {
            ports,
            config,
            bookings,
            payments,
            entity_locks: DashMap::new(),
            calendar_locks: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &dyn Repository {
        self.ports.repository.as_ref()
    }

    pub fn events(&self) -> &dyn EventBus {
        self.ports.events.as_ref()
    }

    pub fn gateways(&self) -> &dyn GatewayRegistry {
        self.ports.gateways.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Ms {
        self.ports.clock.now()
    }

    // ── Locking ──────────────────────────────────────────────

    /// Serializes read-check-write on one booking or payment.
    pub(super) async fn lock_entity(&self, id: Ulid) -> OwnedMutexGuard<()> {
        let lock = self.entity_locks.entry(id).or_default().value().clone();
        lock.lock_owned().await
    }

    /// Locks every calendar once, in sorted order to prevent deadlocks.
    pub(super) async fn lock_calendars<I>(&self, calendars: I) -> Vec<OwnedMutexGuard<()>>
    where
        I: IntoIterator<Item = CalendarKey>,
    {
        let mut keys: Vec<CalendarKey> = calendars.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.calendar_locks.entry(key).or_default().value().clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Drop lock entries nobody holds or waits on.
    pub fn prune_idle_locks(&self) {
        self.entity_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.calendar_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    // ── Finalize helpers ─────────────────────────────────────

    fn log_entry(&self, message: String, author_id: Option<Ulid>) -> LogEntry {
        let mut message = message;
        if message.len() > MAX_LOG_MESSAGE_LEN {
            let mut cut = MAX_LOG_MESSAGE_LEN;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        LogEntry {
            timestamp: self.now(),
            author_id,
            message,
        }
    }

    /// Best-effort: a failed append never undoes the committed status.
    pub(crate) async fn append_booking_log(&self, booking: &mut Booking, message: String, author_id: Option<Ulid>) {
        let entry = self.log_entry(message, author_id);
        match self.repository().append_booking_log(booking.id, &entry).await {
            Ok(()) => booking.logs.push(entry),
            Err(e) => warn!(booking_id = %booking.id, error = %e, "booking log append failed"),
        }
    }

    pub(crate) async fn append_payment_log(&self, payment: &mut Payment, message: String, author_id: Option<Ulid>) {
        let entry = self.log_entry(message, author_id);
        match self.repository().append_payment_log(payment.id, &entry).await {
            Ok(()) => payment.logs.push(entry),
            Err(e) => warn!(payment_id = %payment.id, error = %e, "payment log append failed"),
        }
    }

    /// Ask the host to run the abandonment sweep once the pending window ends.
    pub(crate) async fn schedule_pending_sweep(&self, payment_id: Ulid) {
        let task = SweepTask { payment_id };
        if let Err(e) = self
            .ports
            .scheduler
            .schedule_sweep(self.config.pending_payment_minutes, task)
            .await
        {
            warn!(%payment_id, error = %e, "could not schedule pending-payment sweep");
        }
    }

    /// Drive the linked booking after a payment transition.
    ///
    /// A booking that already holds its slot is moved without the conflict
    /// guard. One that released its slot (cancelled, abandoned) is never
    /// revived by a payment; one that never claimed it (auto-draft) must pass
    /// the guard under its calendar locks.
    pub(crate) async fn cascade_to_booking(
        &self,
        payment: &Payment,
        cascade: BookingCascade,
        actor_id: Option<Ulid>,
        mode: CascadeMode,
    ) -> Result<(), EngineError> {
        let (target, note) = match cascade {
            BookingCascade::Nothing => return Ok(()),
            BookingCascade::ConfirmWithPayment => (BookingStatus::Confirmed, None),
            BookingCascade::SetStatus { status, note } => (status, note),
        };
        let Some(booking_id) = payment.expecting_booking_id else {
            return Ok(());
        };

        let _guard = self.lock_entity(booking_id).await;
        let Some(mut booking) = self.repository().find_booking(booking_id).await? else {
            warn!(%booking_id, payment_id = %payment.id, "payment points at a missing booking");
            return Ok(());
        };
        let from = booking.status;

        if holds_time_slot(target) && !holds_time_slot(from) {
            if mode == CascadeMode::Apply {
                warn!(%booking_id, payment_id = %payment.id, %from, "payment for a released booking, status kept");
                let message = format!(
                    "Payment {} received after the booking was {from}; status left unchanged.",
                    payment.status
                );
                self.append_booking_log(&mut booking, message, actor_id).await;
            }
            return Ok(());
        }
        if mode == CascadeMode::Resume && cascade_settled(from, target) {
            return Ok(());
        }

        let _calendar_guards = if from == BookingStatus::AutoDraft && holds_time_slot(target) {
            let guards = self
                .lock_calendars(booking.reservations.iter().map(Reservation::calendar))
                .await;
            ConflictGuard::new(self).check(&booking, target).await?;
            guards
        } else {
            Vec::new()
        };

        let strategy = BookingStrategy {
            engine: self,
            actor_id,
        };
        self.bookings
            .transition(&strategy, &mut booking, booking_id, from, target, self.events())
            .await?;

        if let Some(note) = note {
            self.append_booking_log(&mut booking, note.to_string(), actor_id).await;
        }
        if cascade == BookingCascade::ConfirmWithPayment {
            self.events().publish(&StatusEvent::BookingConfirmedWithPayment {
                booking_id,
                payment_id: payment.id,
            });
        }
        Ok(())
    }
}
