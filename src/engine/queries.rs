use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_BUFFER_MINUTES;
use crate::model::*;
use crate::period::TimePeriod;
use crate::period_set::TimePeriodSet;
use crate::status::{BookingStatus, PaymentStatus, Status, StatusMachine};

use super::availability::AvailabilityChecker;
use super::conflict::ServiceCache;
use super::{Engine, EngineError};

impl Engine {
    /// Read-only pre-submission check for one person on `time_slot` (time of
    /// day) of `date`. Pass the booking being edited as `exclude_booking_id`.
    pub async fn is_slot_available(
        &self,
        service_id: Ulid,
        employee_id: Ulid,
        location_id: Ulid,
        date: NaiveDate,
        time_slot: TimePeriod,
        exclude_booking_id: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let started = Instant::now();
        let mut cache = ServiceCache::new();
        let service = self.require_service(&mut cache, service_id).await?;
        let candidate = service.occupied(&time_slot.on_date(date));
        let calendar = CalendarKey {
            employee_id,
            location_id,
        };
        let busy = self
            .busy_slots(&mut cache, calendar, &candidate, exclude_booking_id)
            .await?;
        let available = AvailabilityChecker::new(&service).is_available(&candidate, &busy, 1);

        let result = if available { "available" } else { "unavailable" };
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL, "result" => result).increment(1);
        metrics::histogram!(crate::observability::AVAILABILITY_CHECK_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(available)
    }

    /// Free time inside `working_hours` (time of day) on `date`, sorted by
    /// start. An appointment of the service fits wherever it lies entirely
    /// inside one returned period; its own buffers are already accounted for.
    pub async fn available_periods(
        &self,
        service_id: Ulid,
        employee_id: Ulid,
        location_id: Ulid,
        date: NaiveDate,
        working_hours: TimePeriod,
    ) -> Result<Vec<TimePeriod>, EngineError> {
        let mut cache = ServiceCache::new();
        let service = self.require_service(&mut cache, service_id).await?;
        let window = working_hours.on_date(date);
        let calendar = CalendarKey {
            employee_id,
            location_id,
        };
        let busy = self
            .busy_slots(&mut cache, calendar, &service.occupied(&window), None)
            .await?;

        let before = service.buffer_before.clamp(0, MAX_BUFFER_MINUTES);
        let after = service.buffer_after.clamp(0, MAX_BUFFER_MINUTES);
        let mut free = TimePeriodSet::from_periods([window]);
        for blocked in &AvailabilityChecker::new(&service).unavailable_periods(&busy, 1) {
            // Our buffer_after must clear what comes next, buffer_before what came before.
            free.diff_period(&blocked.expanded(after, before));
        }
        Ok(free.sorted())
    }

    pub fn booking_statuses(&self) -> &StatusMachine<BookingStatus> {
        &self.bookings
    }

    pub fn payment_statuses(&self) -> &StatusMachine<PaymentStatus> {
        &self.payments
    }

    /// Picker entries in registration order.
    pub fn manual_booking_statuses(&self) -> Vec<&Status<BookingStatus>> {
        self.bookings.manual_statuses()
    }

    pub fn manual_payment_statuses(&self) -> Vec<&Status<PaymentStatus>> {
        self.payments.manual_statuses()
    }

    pub fn booking_status_label(&self, name: &str) -> String {
        self.bookings.label(name)
    }

    pub fn payment_status_label(&self, name: &str) -> String {
        self.payments.label(name)
    }
}
