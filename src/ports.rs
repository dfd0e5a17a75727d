// Ports: what the engine needs from the host application.
//
// The engine never owns storage, timers or message transport. The host plugs
// its implementations in through these traits; `store`, `notify` and `reaper`
// provide in-process versions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;
use crate::period::TimePeriod;
use crate::status::StatusEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("version mismatch on {id}: expected {expected}, actual {actual}")]
    VersionMismatch { id: Ulid, expected: u64, actual: u64 },

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler shut down")]
    Closed,

    #[error("scheduler backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_booking(&self, id: Ulid) -> Result<Option<Booking>, RepositoryError>;
    async fn find_payment(&self, id: Ulid) -> Result<Option<Payment>, RepositoryError>;
    async fn find_service(&self, id: Ulid) -> Result<Option<Service>, RepositoryError>;

    /// Reservations on a calendar whose slot intersects `window`, in any booking status.
    async fn find_reservations_for(
        &self,
        calendar: CalendarKey,
        window: &TimePeriod,
    ) -> Result<Vec<ReservationRecord>, RepositoryError>;

    /// Persist and return the new version. Fails with `VersionMismatch` if
    /// `booking.version` is not the stored one.
    async fn save_booking(&self, booking: &Booking) -> Result<u64, RepositoryError>;
    async fn save_payment(&self, payment: &Payment) -> Result<u64, RepositoryError>;

    async fn append_booking_log(&self, booking_id: Ulid, entry: &LogEntry) -> Result<(), RepositoryError>;
    async fn append_payment_log(&self, payment_id: Ulid, entry: &LogEntry) -> Result<(), RepositoryError>;

    /// Pending payments whose expiry is at or before `now`.
    async fn find_expired_pending_payments(&self, now: Ms) -> Result<Vec<Ulid>, RepositoryError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;
}

/// A deferred abandonment check for one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTask {
    pub payment_id: Ulid,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule_sweep(&self, after_minutes: i64, task: SweepTask) -> Result<(), SchedulerError>;
}

/// Receives announce events once the state they describe is committed and
/// logged. A transition's own events follow those of anything its bookkeeping
/// caused: a payment that confirms its booking publishes the booking events
/// (and `booking_confirmed_with_payment`) before its own
/// `payment_status_changed`. `booking_confirmed_with_payment` carries both
/// ids for subscribers that correlate the two.
pub trait EventBus: Send + Sync {
    /// Fire and forget.
    fn publish(&self, event: &StatusEvent);
}

pub trait GatewayRegistry: Send + Sync {
    fn is_instant_gateway(&self, gateway_id: &str) -> bool;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self { now: AtomicI64::new(now) }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// Gateway registry backed by a fixed set of instant gateway ids.
#[derive(Debug, Clone, Default)]
pub struct InstantGateways {
    instant: HashSet<String>,
}

impl InstantGateways {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instant: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl GatewayRegistry for InstantGateways {
    fn is_instant_gateway(&self, gateway_id: &str) -> bool {
        self.instant.contains(gateway_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now(), 1_500);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(SystemClock.now() > 0);
    }

    #[test]
    fn instant_gateways_lookup() {
        let gateways = InstantGateways::new(["stripe", "cash"]);
        assert!(gateways.is_instant_gateway("stripe"));
        assert!(!gateways.is_instant_gateway("bank-transfer"));
    }
}
