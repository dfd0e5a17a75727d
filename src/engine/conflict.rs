use std::collections::HashMap;

use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::period::TimePeriod;
use crate::status::{holds_time_slot, BookingStatus};

use super::availability::{AvailabilityChecker, BusySlot};
use super::{ConflictError, Engine, EngineError, ValidationError};

/// Services already looked up during one check. `None` = not in the repository.
pub(super) type ServiceCache = HashMap<Ulid, Option<Service>>;

impl Engine {
    pub(super) async fn lookup_service(
        &self,
        cache: &mut ServiceCache,
        id: Ulid,
    ) -> Result<Option<Service>, EngineError> {
        if let Some(service) = cache.get(&id) {
            return Ok(service.clone());
        }
        let service = self.repository().find_service(id).await?;
        cache.insert(id, service.clone());
        Ok(service)
    }

    pub(super) async fn require_service(&self, cache: &mut ServiceCache, id: Ulid) -> Result<Service, EngineError> {
        self.lookup_service(cache, id).await?.ok_or(EngineError::NotFound(id))
    }

    /// Slots taken on `calendar` that intersect `window`, each expanded by its
    /// own service buffers. Reservations of `exclude_booking` and of bookings
    /// in a slot-releasing status are left out.
    pub(super) async fn busy_slots(
        &self,
        cache: &mut ServiceCache,
        calendar: CalendarKey,
        window: &TimePeriod,
        exclude_booking: Option<Ulid>,
    ) -> Result<Vec<BusySlot>, EngineError> {
        // Other reservations' buffers can reach into the window from outside it.
        let padded = window.expanded(MAX_BUFFER_MINUTES, MAX_BUFFER_MINUTES);

        let records = self.repository().find_reservations_for(calendar, &padded).await?;
        let mut busy = Vec::with_capacity(records.len());
        for record in records {
            if Some(record.booking_id) == exclude_booking || !holds_time_slot(record.booking_status) {
                continue;
            }
            let r = &record.reservation;
            let service = match self.lookup_service(cache, r.service_id).await? {
                Some(service) => service,
                None => {
                    debug!(service_id = %r.service_id, reservation_id = %r.id, "unknown service, no buffers applied");
                    Service::new(r.service_id)
                }
            };
            let period = service.occupied(&r.period());
            if period.intersects(window) {
                busy.push(BusySlot {
                    reservation_id: r.id,
                    service_id: r.service_id,
                    period,
                    capacity: r.capacity,
                });
            }
        }
        Ok(busy)
    }
}

/// Gates a booking transition into a slot-holding status: every reservation
/// must still fit, ignoring the booking's own reservations.
pub struct ConflictGuard<'a> {
    engine: &'a Engine,
}

impl<'a> ConflictGuard<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// All-or-nothing: one blocked reservation rejects the whole transition.
    pub async fn check(&self, booking: &Booking, to: BookingStatus) -> Result<(), EngineError> {
        if !holds_time_slot(to) {
            return Ok(());
        }
        if booking.reservations.len() > MAX_RESERVATIONS_PER_BOOKING {
            return Err(ValidationError::LimitExceeded("too many reservations on booking").into());
        }

        let mut cache = ServiceCache::new();
        let mut blocked = false;
        let mut blocking_reservations: Vec<Ulid> = Vec::new();

        for r in &booking.reservations {
            let service = self.engine.require_service(&mut cache, r.service_id).await?;
            let candidate = service.occupied(&r.period());
            let busy = self
                .engine
                .busy_slots(&mut cache, r.calendar(), &candidate, Some(booking.id))
                .await?;
            if let Some(ids) = AvailabilityChecker::new(&service).blocking(&candidate, &busy, r.capacity) {
                blocked = true;
                for id in ids {
                    if !blocking_reservations.contains(&id) {
                        blocking_reservations.push(id);
                    }
                }
            }
        }

        if !blocked {
            return Ok(());
        }
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        debug!(booking_id = %booking.id, to = %to, blocking = blocking_reservations.len(), "slot conflict");
        Err(ConflictError {
            booking_id: booking.id,
            attempted: to,
            blocking_reservations,
        }
        .into())
    }
}
