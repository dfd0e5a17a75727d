//! Generic status machine shared by bookings and payments.
//!
//! A machine owns an ordered registry of [`Status`] entries and drives one
//! transition at a time through a [`TransitionStrategy`]: the strategy commits
//! the new status, then runs the machine's mandatory bookkeeping, and only then
//! are the announce events published.

mod booking;
mod payment;

pub use booking::{
    booked_statuses, booking_machine, failed_statuses, holds_time_slot, pending_statuses,
    unblocked_time_slot_statuses, BookingStatus, BookingStrategy,
};
pub use payment::{
    cascade_for, is_regression, payment_machine, BookingCascade, PaymentStatus, PaymentStrategy, PAYMENT_ON_HOLD_NOTE,
    PAYMENT_REFUNDED_NOTE,
};

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use ulid::Ulid;

use crate::engine::{EngineError, ValidationError};
use crate::limits::MAX_STATUS_NAME_LEN;
use crate::ports::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Booking,
    Payment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Booking => "booking",
            EntityKind::Payment => "payment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which announce event a transition produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// The entity left the new-entity sentinel status.
    Created,
    /// Any other status change.
    Changed,
    /// Status-specific event, named after the new status.
    Entered,
}

/// A closed set of status identifiers for one entity kind.
pub trait StatusKind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    const ENTITY: EntityKind;
    /// Status of an entity that has not been created yet.
    const NEW_ENTITY: Self;

    fn as_str(&self) -> &'static str;
    fn from_name(name: &str) -> Option<Self>;
    fn event(kind: TransitionKind, transition: Transition<Self>) -> StatusEvent;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status<S> {
    pub name: S,
    pub label: String,
    pub public: bool,
    pub internal: bool,
    /// Operators may pick it directly in the admin UI.
    pub manual: bool,
}

impl<S> Status<S> {
    pub fn new(name: S, label: impl Into<String>) -> Self {
        Self {
            name,
            label: label.into(),
            public: true,
            internal: false,
            manual: true,
        }
    }

    pub fn system_only(mut self) -> Self {
        self.manual = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition<S> {
    pub entity_id: Ulid,
    pub from: S,
    pub to: S,
    pub is_new: bool,
}

/// Announce events. The conventional host-facing name comes from [`StatusEvent::name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    BookingCreated(Transition<BookingStatus>),
    BookingStatusChanged(Transition<BookingStatus>),
    BookingEntered(Transition<BookingStatus>),
    BookingConfirmedWithPayment { booking_id: Ulid, payment_id: Ulid },
    PaymentCreated(Transition<PaymentStatus>),
    PaymentStatusChanged(Transition<PaymentStatus>),
    PaymentEntered(Transition<PaymentStatus>),
}

impl StatusEvent {
    pub fn name(&self) -> String {
        match self {
            StatusEvent::BookingCreated(_) => "booking_created".into(),
            StatusEvent::BookingStatusChanged(_) => "booking_status_changed".into(),
            StatusEvent::BookingEntered(t) => format!("booking_{}", t.to.as_str()),
            StatusEvent::BookingConfirmedWithPayment { .. } => "booking_confirmed_with_payment".into(),
            StatusEvent::PaymentCreated(_) => "payment_created".into(),
            StatusEvent::PaymentStatusChanged(_) => "payment_status_changed".into(),
            StatusEvent::PaymentEntered(t) => format!("payment_{}", t.to.as_str()),
        }
    }

    /// The entity the event is about, used for per-entity subscriptions.
    pub fn entity_id(&self) -> Ulid {
        match self {
            StatusEvent::BookingCreated(t)
            | StatusEvent::BookingStatusChanged(t)
            | StatusEvent::BookingEntered(t) => t.entity_id,
            StatusEvent::BookingConfirmedWithPayment { booking_id, .. } => *booking_id,
            StatusEvent::PaymentCreated(t)
            | StatusEvent::PaymentStatusChanged(t)
            | StatusEvent::PaymentEntered(t) => t.entity_id,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Per-machine commit and finalize steps.
#[async_trait]
pub trait TransitionStrategy<S: StatusKind>: Send + Sync {
    type Entity: Send;

    /// Persist the new status. Nothing has happened yet if this fails.
    async fn commit(&self, entity: &mut Self::Entity, transition: &Transition<S>) -> Result<(), EngineError>;

    /// Mandatory bookkeeping that must not depend on event subscribers.
    async fn finalize(&self, entity: &mut Self::Entity, transition: &Transition<S>) -> Result<(), EngineError>;
}

/// Registry of statuses for one entity kind plus the transition driver.
/// Built once at start-up, read-only afterwards.
#[derive(Debug, Clone)]
pub struct StatusMachine<S: StatusKind> {
    statuses: Vec<Status<S>>,
    default_manual: S,
}

impl<S: StatusKind> StatusMachine<S> {
    pub fn new(default_manual: S) -> Self {
        Self {
            statuses: Vec::new(),
            default_manual,
        }
    }

    /// Register a status. Re-registering a name replaces the entry in place.
    pub fn register(&mut self, status: Status<S>) {
        match self.statuses.iter_mut().find(|s| s.name == status.name) {
            Some(existing) => {
                warn!(entity = %S::ENTITY, status = %status.name, "status registered twice, replacing");
                *existing = status;
            }
            None => self.statuses.push(status),
        }
    }

    pub fn with(mut self, status: Status<S>) -> Self {
        self.register(status);
        self
    }

    pub fn has_status(&self, name: &str) -> bool {
        S::from_name(name).is_some_and(|s| self.status(s).is_some())
    }

    pub fn status(&self, name: S) -> Option<&Status<S>> {
        self.statuses.iter().find(|s| s.name == name)
    }

    pub fn is_manual(&self, name: S) -> bool {
        self.status(name).is_some_and(|s| s.manual)
    }

    pub fn label(&self, name: &str) -> String {
        S::from_name(name)
            .and_then(|s| self.status(s))
            .map(|s| s.label.clone())
            .unwrap_or_else(|| format!("Unknown status ({name})"))
    }

    /// Manually assignable statuses in registration order. This order is
    /// what the host's status pickers show.
    pub fn manual_statuses(&self) -> Vec<&Status<S>> {
        self.statuses.iter().filter(|s| s.manual).collect()
    }

    pub fn public_statuses(&self) -> Vec<&Status<S>> {
        self.statuses.iter().filter(|s| s.public && !s.internal).collect()
    }

    pub fn statuses(&self) -> &[Status<S>] {
        &self.statuses
    }

    pub fn default_manual_status(&self) -> S {
        self.default_manual
    }

    /// Map a host-supplied name to a registered status.
    pub fn resolve(&self, name: &str) -> Result<S, ValidationError> {
        if name.len() > MAX_STATUS_NAME_LEN {
            return Err(ValidationError::LimitExceeded("status name too long"));
        }
        S::from_name(name)
            .filter(|s| self.status(*s).is_some())
            .ok_or_else(|| ValidationError::UnknownStatus {
                entity: S::ENTITY,
                name: name.to_string(),
            })
    }

    /// Validate a requested change. `None` means nothing to do.
    pub fn plan(&self, entity_id: Ulid, from: S, to: S) -> Result<Option<Transition<S>>, ValidationError> {
        if self.status(to).is_none() {
            return Err(ValidationError::UnknownStatus {
                entity: S::ENTITY,
                name: to.as_str().to_string(),
            });
        }
        if from == to {
            return Ok(None);
        }
        Ok(Some(Transition {
            entity_id,
            from,
            to,
            is_new: from == S::NEW_ENTITY,
        }))
    }

    /// Announce events for a committed transition, in publish order.
    pub fn notifications(&self, transition: &Transition<S>) -> Vec<StatusEvent> {
        let generic = if transition.is_new {
            TransitionKind::Created
        } else {
            TransitionKind::Changed
        };
        vec![
            S::event(generic, *transition),
            S::event(TransitionKind::Entered, *transition),
        ]
    }

    /// Commit, finalize, then announce. Once the commit succeeded the events
    /// are published even if finalize fails; the finalize error is returned.
    pub async fn transition<T>(
        &self,
        strategy: &T,
        entity: &mut T::Entity,
        entity_id: Ulid,
        from: S,
        to: S,
        events: &dyn EventBus,
    ) -> Result<Option<Transition<S>>, EngineError>
    where
        T: TransitionStrategy<S>,
    {
        let Some(transition) = self.plan(entity_id, from, to)? else {
            return Ok(None);
        };
        strategy.commit(entity, &transition).await?;
        let finalized = strategy.finalize(entity, &transition).await;
        for event in self.notifications(&transition) {
            events.publish(&event);
        }
        metrics::counter!(
            crate::observability::TRANSITIONS_TOTAL,
            "entity" => S::ENTITY.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        finalized.map(|()| Some(transition))
    }
}
