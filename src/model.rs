use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_BUFFER_MINUTES;
use crate::period::TimePeriod;
use crate::status::{BookingStatus, PaymentStatus};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Duration and capacity settings of a bookable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    /// Minutes blocked before each appointment.
    pub buffer_before: i64,
    /// Minutes blocked after each appointment (e.g. cleaning time).
    pub buffer_after: i64,
    /// Max people served at once (default 1).
    pub max_capacity: u32,
    /// Group services let overlapping reservations share `max_capacity`.
    pub shares_capacity: bool,
}

impl Service {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            buffer_before: 0,
            buffer_after: 0,
            max_capacity: 1,
            shares_capacity: false,
        }
    }

    pub fn with_buffers(mut self, before: i64, after: i64) -> Self {
        self.buffer_before = before;
        self.buffer_after = after;
        self
    }

    pub fn with_capacity(mut self, max_capacity: u32, shares_capacity: bool) -> Self {
        self.max_capacity = max_capacity;
        self.shares_capacity = shares_capacity;
        self
    }

    /// The slot a booking of `period` actually occupies on the calendar.
    pub fn occupied(&self, period: &TimePeriod) -> TimePeriod {
        period.expanded(
            self.buffer_before.clamp(0, MAX_BUFFER_MINUTES),
            self.buffer_after.clamp(0, MAX_BUFFER_MINUTES),
        )
    }

    pub fn is_shared(&self) -> bool {
        self.shares_capacity && self.max_capacity > 1
    }
}

/// One employee's calendar at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarKey {
    pub employee_id: Ulid,
    pub location_id: Ulid,
}

/// One service/employee/location/date/time line item of a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub service_id: Ulid,
    pub employee_id: Ulid,
    pub location_id: Ulid,
    pub date: NaiveDate,
    /// Time of day, ms since midnight.
    pub time: TimePeriod,
    /// Number of people.
    pub capacity: u32,
}

impl Reservation {
    pub fn period(&self) -> TimePeriod {
        self.time.on_date(self.date)
    }

    pub fn calendar(&self) -> CalendarKey {
        CalendarKey {
            employee_id: self.employee_id,
            location_id: self.location_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Ms,
    pub author_id: Option<Ulid>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub status: BookingStatus,
    pub reservations: Vec<Reservation>,
    pub payments: Vec<Ulid>,
    /// Append-only audit trail.
    pub logs: Vec<LogEntry>,
    /// Optimistic concurrency stamp, bumped by every save.
    pub version: u64,
}

impl Booking {
    pub fn new(id: Ulid, reservations: Vec<Reservation>) -> Self {
        Self {
            id,
            status: BookingStatus::AutoDraft,
            reservations,
            payments: Vec::new(),
            logs: Vec::new(),
            version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub status: PaymentStatus,
    pub expecting_booking_id: Option<Ulid>,
    pub gateway_id: String,
    /// Set while `pending`; the abandonment sweep compares against it.
    pub pending_expires_at: Option<Ms>,
    pub logs: Vec<LogEntry>,
    pub version: u64,
}

impl Payment {
    pub fn new(id: Ulid, gateway_id: impl Into<String>, expecting_booking_id: Option<Ulid>) -> Self {
        Self {
            id,
            status: PaymentStatus::AutoDraft,
            expecting_booking_id,
            gateway_id: gateway_id.into(),
            pending_expires_at: None,
            logs: Vec::new(),
            version: 0,
        }
    }
}

/// A stored reservation together with the state of the booking it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRecord {
    pub booking_id: Ulid,
    pub booking_status: BookingStatus,
    pub reservation: Reservation,
}

/// Who asked for a payment status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSource {
    /// Operator in the admin UI; only manual statuses are allowed.
    Admin,
    /// Payment provider callback.
    Gateway,
    /// Pending-payment abandonment sweep.
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentChangeContext {
    pub source: ChangeSource,
    pub actor_id: Option<Ulid>,
}

impl PaymentChangeContext {
    pub fn gateway() -> Self {
        Self {
            source: ChangeSource::Gateway,
            actor_id: None,
        }
    }

    pub fn admin(actor_id: Option<Ulid>) -> Self {
        Self {
            source: ChangeSource::Admin,
            actor_id,
        }
    }

    pub fn sweep() -> Self {
        Self {
            source: ChangeSource::Sweep,
            actor_id: None,
        }
    }
}
