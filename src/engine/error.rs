use thiserror::Error;
use ulid::Ulid;

use crate::ports::RepositoryError;
use crate::status::{BookingStatus, EntityKind};

/// Request rejected before anything was mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown {entity} status {name:?}")]
    UnknownStatus { entity: EntityKind, name: String },

    #[error("{entity} status {status:?} cannot be assigned manually")]
    NotManuallyAssignable { entity: EntityKind, status: String },

    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: EntityKind,
        from: String,
        to: String,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

/// The requested slot is no longer free. Retry with another slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("time slot no longer available: booking {booking_id} cannot become {attempted}")]
pub struct ConflictError {
    pub booking_id: Ulid,
    pub attempted: BookingStatus,
    /// Other reservations occupying the slot, when known.
    pub blocking_reservations: Vec<Ulid>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// Worth retrying as-is or with a different slot.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict(_) | EngineError::Repository(RepositoryError::VersionMismatch { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_kinds() {
        let conflict = EngineError::from(ConflictError {
            booking_id: Ulid::new(),
            attempted: BookingStatus::Confirmed,
            blocking_reservations: vec![],
        });
        assert!(conflict.is_retriable());

        let stale = EngineError::from(RepositoryError::VersionMismatch {
            id: Ulid::new(),
            expected: 1,
            actual: 2,
        });
        assert!(stale.is_retriable());

        assert!(!EngineError::NotFound(Ulid::new()).is_retriable());
        assert!(!EngineError::from(RepositoryError::Backend("down".into())).is_retriable());
        assert!(!EngineError::from(ValidationError::LimitExceeded("x")).is_retriable());
    }

    #[test]
    fn messages_are_readable() {
        let err = ValidationError::UnknownStatus {
            entity: EntityKind::Payment,
            name: "paid".into(),
        };
        assert_eq!(err.to_string(), "unknown payment status \"paid\"");
    }
}
