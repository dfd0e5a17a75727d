use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{EntityKind, Status, StatusEvent, StatusKind, StatusMachine, Transition, TransitionKind, TransitionStrategy};
use crate::engine::{Engine, EngineError};
use crate::model::Booking;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    /// Host-side placeholder before the booking is first saved.
    AutoDraft,
    Draft,
    Trash,
    Pending,
    Confirmed,
    Cancelled,
    /// Set by the abandonment sweep only.
    Abandoned,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::AutoDraft => "auto-draft",
            BookingStatus::Draft => "draft",
            BookingStatus::Trash => "trash",
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StatusKind for BookingStatus {
    const ENTITY: EntityKind = EntityKind::Booking;
    const NEW_ENTITY: Self = BookingStatus::AutoDraft;

    fn as_str(&self) -> &'static str {
        BookingStatus::as_str(self)
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "auto-draft" => BookingStatus::AutoDraft,
            "draft" => BookingStatus::Draft,
            "trash" => BookingStatus::Trash,
            "pending" => BookingStatus::Pending,
            "confirmed" => BookingStatus::Confirmed,
            "cancelled" => BookingStatus::Cancelled,
            "abandoned" => BookingStatus::Abandoned,
            _ => return None,
        })
    }

    fn event(kind: TransitionKind, transition: Transition<Self>) -> StatusEvent {
        match kind {
            TransitionKind::Created => StatusEvent::BookingCreated(transition),
            TransitionKind::Changed => StatusEvent::BookingStatusChanged(transition),
            TransitionKind::Entered => StatusEvent::BookingEntered(transition),
        }
    }
}

pub fn booking_machine() -> StatusMachine<BookingStatus> {
    StatusMachine::new(BookingStatus::Confirmed)
        .with(Status::new(BookingStatus::Pending, "Pending"))
        .with(Status::new(BookingStatus::Cancelled, "Cancelled"))
        .with(Status::new(BookingStatus::Abandoned, "Abandoned").system_only())
        .with(Status::new(BookingStatus::Confirmed, "Confirmed"))
}

pub fn pending_statuses() -> &'static [BookingStatus] {
    &[BookingStatus::Pending]
}

pub fn failed_statuses() -> &'static [BookingStatus] {
    &[BookingStatus::Cancelled, BookingStatus::Abandoned]
}

pub fn booked_statuses() -> &'static [BookingStatus] {
    &[BookingStatus::Confirmed]
}

/// Statuses whose reservations do not occupy calendar time.
pub fn unblocked_time_slot_statuses() -> &'static [BookingStatus] {
    &[
        BookingStatus::Draft,
        BookingStatus::Trash,
        BookingStatus::Cancelled,
        BookingStatus::Abandoned,
    ]
}

pub fn holds_time_slot(status: BookingStatus) -> bool {
    !unblocked_time_slot_statuses().contains(&status)
}

/// Saves the booking and appends the audit entry.
pub struct BookingStrategy<'a> {
    pub engine: &'a Engine,
    pub actor_id: Option<Ulid>,
}

#[async_trait]
impl TransitionStrategy<BookingStatus> for BookingStrategy<'_> {
    type Entity = Booking;

    async fn commit(&self, booking: &mut Booking, transition: &Transition<BookingStatus>) -> Result<(), EngineError> {
        booking.status = transition.to;
        match self.engine.repository().save_booking(booking).await {
            Ok(version) => {
                booking.version = version;
                Ok(())
            }
            Err(e) => {
                booking.status = transition.from;
                Err(e.into())
            }
        }
    }

    async fn finalize(&self, booking: &mut Booking, transition: &Transition<BookingStatus>) -> Result<(), EngineError> {
        let message = format!("Status changed from {} to {}.", transition.from, transition.to);
        self.engine.append_booking_log(booking, message, self.actor_id).await;
        Ok(())
    }
}
