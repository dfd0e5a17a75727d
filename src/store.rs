use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;
use crate::period::TimePeriod;
use crate::ports::{Repository, RepositoryError};
use crate::status::PaymentStatus;

/// Process-local repository. Enforces optimistic versions the way a
/// relational host would with a version column.
pub struct InMemoryRepository {
    bookings: DashMap<Ulid, Booking>,
    payments: DashMap<Ulid, Payment>,
    services: DashMap<Ulid, Service>,
    /// Calendar → bookings with at least one reservation on it.
    calendars: DashMap<CalendarKey, Vec<Ulid>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            payments: DashMap::new(),
            services: DashMap::new(),
            calendars: DashMap::new(),
        }
    }

    pub fn insert_service(&self, service: Service) {
        self.services.insert(service.id, service);
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn get_payment(&self, id: &Ulid) -> Option<Payment> {
        self.payments.get(id).map(|e| e.value().clone())
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    // ── Calendar index ───────────────────────────────────────

    fn index_calendars(&self, booking_id: Ulid, reservations: &[Reservation]) {
        for r in reservations {
            let mut ids = self.calendars.entry(r.calendar()).or_default();
            if !ids.contains(&booking_id) {
                ids.push(booking_id);
            }
        }
    }

    /// Drop the booking from calendars it no longer has a reservation on.
    fn unindex_stale_calendars(&self, booking_id: &Ulid, previous: &[Reservation], current: &[Reservation]) {
        for r in previous {
            let calendar = r.calendar();
            if current.iter().any(|c| c.calendar() == calendar) {
                continue;
            }
            if let Some(mut ids) = self.calendars.get_mut(&calendar) {
                ids.retain(|id| id != booking_id);
            }
        }
    }

    fn bookings_on(&self, calendar: &CalendarKey) -> Vec<Ulid> {
        self.calendars
            .get(calendar)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_booking(&self, id: Ulid) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.get_booking(&id))
    }

    async fn find_payment(&self, id: Ulid) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.get_payment(&id))
    }

    async fn find_service(&self, id: Ulid) -> Result<Option<Service>, RepositoryError> {
        Ok(self.services.get(&id).map(|e| e.value().clone()))
    }

    async fn find_reservations_for(
        &self,
        calendar: CalendarKey,
        window: &TimePeriod,
    ) -> Result<Vec<ReservationRecord>, RepositoryError> {
        let mut records = Vec::new();
        for booking_id in self.bookings_on(&calendar) {
            let Some(booking) = self.bookings.get(&booking_id) else {
                continue;
            };
            for r in &booking.reservations {
                if r.calendar() == calendar && r.period().intersects(window) {
                    records.push(ReservationRecord {
                        booking_id,
                        booking_status: booking.status,
                        reservation: r.clone(),
                    });
                }
            }
        }
        Ok(records)
    }

    /// The calendar index gains new calendars before the record is swapped and
    /// loses stale ones after, so lookups never miss a stored booking.
    async fn save_booking(&self, booking: &Booking) -> Result<u64, RepositoryError> {
        let next = booking.version + 1;
        let mut stored = booking.clone();
        stored.version = next;
        match self.bookings.entry(booking.id) {
            Entry::Occupied(mut entry) => {
                let actual = entry.get().version;
                if actual != booking.version {
                    return Err(RepositoryError::VersionMismatch {
                        id: booking.id,
                        expected: booking.version,
                        actual,
                    });
                }
                self.index_calendars(booking.id, &booking.reservations);
                let previous = entry.insert(stored);
                self.unindex_stale_calendars(&booking.id, &previous.reservations, &booking.reservations);
            }
            Entry::Vacant(entry) => {
                if booking.version != 0 {
                    return Err(RepositoryError::VersionMismatch {
                        id: booking.id,
                        expected: booking.version,
                        actual: 0,
                    });
                }
                self.index_calendars(booking.id, &booking.reservations);
                entry.insert(stored);
            }
        }
        Ok(next)
    }

    async fn save_payment(&self, payment: &Payment) -> Result<u64, RepositoryError> {
        let next = payment.version + 1;
        let mut stored = payment.clone();
        stored.version = next;
        match self.payments.entry(payment.id) {
            Entry::Occupied(mut entry) => {
                let actual = entry.get().version;
                if actual != payment.version {
                    return Err(RepositoryError::VersionMismatch {
                        id: payment.id,
                        expected: payment.version,
                        actual,
                    });
                }
                entry.insert(stored);
            }
            Entry::Vacant(entry) => {
                if payment.version != 0 {
                    return Err(RepositoryError::VersionMismatch {
                        id: payment.id,
                        expected: payment.version,
                        actual: 0,
                    });
                }
                entry.insert(stored);
            }
        }
        Ok(next)
    }

    async fn append_booking_log(&self, booking_id: Ulid, entry: &LogEntry) -> Result<(), RepositoryError> {
        let mut booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| RepositoryError::Backend(format!("booking {booking_id} not stored")))?;
        booking.logs.push(entry.clone());
        Ok(())
    }

    async fn append_payment_log(&self, payment_id: Ulid, entry: &LogEntry) -> Result<(), RepositoryError> {
        let mut payment = self
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| RepositoryError::Backend(format!("payment {payment_id} not stored")))?;
        payment.logs.push(entry.clone());
        Ok(())
    }

    async fn find_expired_pending_payments(&self, now: Ms) -> Result<Vec<Ulid>, RepositoryError> {
        Ok(self
            .payments
            .iter()
            .filter(|e| {
                e.status == PaymentStatus::Pending && e.pending_expires_at.is_some_and(|t| t <= now)
            })
            .map(|e| *e.key())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::HOUR_MS;
    use crate::status::BookingStatus;
    use chrono::NaiveDate;

    fn reservation(calendar: CalendarKey, start_h: i64, end_h: i64) -> Reservation {
        Reservation {
            id: Ulid::new(),
            service_id: Ulid::new(),
            employee_id: calendar.employee_id,
            location_id: calendar.location_id,
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            time: TimePeriod::new(start_h * HOUR_MS, end_h * HOUR_MS),
            capacity: 1,
        }
    }

    fn calendar() -> CalendarKey {
        CalendarKey {
            employee_id: Ulid::new(),
            location_id: Ulid::new(),
        }
    }

    #[tokio::test]
    async fn save_bumps_version() {
        let repo = InMemoryRepository::new();
        let mut booking = Booking::new(Ulid::new(), vec![]);
        booking.version = repo.save_booking(&booking).await.unwrap();
        assert_eq!(booking.version, 1);
        booking.version = repo.save_booking(&booking).await.unwrap();
        assert_eq!(booking.version, 2);
        assert_eq!(repo.get_booking(&booking.id).unwrap().version, 2);
    }

    #[tokio::test]
    async fn stale_save_is_rejected() {
        let repo = InMemoryRepository::new();
        let booking = Booking::new(Ulid::new(), vec![]);
        repo.save_booking(&booking).await.unwrap();
        let result = repo.save_booking(&booking).await;
        assert_eq!(
            result,
            Err(RepositoryError::VersionMismatch {
                id: booking.id,
                expected: 0,
                actual: 1
            })
        );
    }

    #[tokio::test]
    async fn unsaved_entity_must_start_at_zero() {
        let repo = InMemoryRepository::new();
        let mut payment = Payment::new(Ulid::new(), "cash", None);
        payment.version = 3;
        assert!(matches!(
            repo.save_payment(&payment).await,
            Err(RepositoryError::VersionMismatch { actual: 0, .. })
        ));
    }

    #[tokio::test]
    async fn finds_reservations_on_calendar_window() {
        let repo = InMemoryRepository::new();
        let cal = calendar();
        let other = calendar();
        let mut booking = Booking::new(
            Ulid::new(),
            vec![reservation(cal, 9, 10), reservation(cal, 14, 15), reservation(other, 9, 10)],
        );
        booking.status = BookingStatus::Confirmed;
        repo.save_booking(&booking).await.unwrap();

        let day = booking.reservations[0].date;
        let window = TimePeriod::new(8 * HOUR_MS, 12 * HOUR_MS).on_date(day);
        let found = repo.find_reservations_for(cal, &window).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].booking_id, booking.id);
        assert_eq!(found[0].booking_status, BookingStatus::Confirmed);
        assert_eq!(found[0].reservation.id, booking.reservations[0].id);
    }

    #[tokio::test]
    async fn moved_reservation_leaves_old_calendar() {
        let repo = InMemoryRepository::new();
        let cal = calendar();
        let moved_to = calendar();
        let mut booking = Booking::new(Ulid::new(), vec![reservation(cal, 9, 10)]);
        booking.version = repo.save_booking(&booking).await.unwrap();

        booking.reservations = vec![reservation(moved_to, 9, 10)];
        repo.save_booking(&booking).await.unwrap();

        let window = TimePeriod::new(0, 24 * HOUR_MS).on_date(booking.reservations[0].date);
        assert!(repo.find_reservations_for(cal, &window).await.unwrap().is_empty());
        assert_eq!(repo.find_reservations_for(moved_to, &window).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resave_never_hides_booking_from_lookups() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let repo = Arc::new(InMemoryRepository::new());
        let cal = calendar();
        let mut booking = Booking::new(Ulid::new(), vec![reservation(cal, 9, 10)]);
        booking.status = BookingStatus::Confirmed;
        booking.version = repo.save_booking(&booking).await.unwrap();
        let window = TimePeriod::new(0, 24 * HOUR_MS).on_date(booking.reservations[0].date);

        let done = Arc::new(AtomicBool::new(false));
        let writer = tokio::spawn({
            let repo = repo.clone();
            let done = done.clone();
            async move {
                for _ in 0..20_000 {
                    booking.version = repo.save_booking(&booking).await.unwrap();
                }
                done.store(true, Ordering::Release);
            }
        });

        let mut misses = 0;
        while !done.load(Ordering::Acquire) {
            if repo.find_reservations_for(cal, &window).await.unwrap().is_empty() {
                misses += 1;
            }
        }
        writer.await.unwrap();
        assert_eq!(misses, 0);
    }

    #[tokio::test]
    async fn partial_move_keeps_shared_calendar_indexed() {
        let repo = InMemoryRepository::new();
        let cal = calendar();
        let other = calendar();
        let mut booking = Booking::new(Ulid::new(), vec![reservation(cal, 9, 10), reservation(other, 9, 10)]);
        booking.version = repo.save_booking(&booking).await.unwrap();

        booking.reservations.truncate(1);
        repo.save_booking(&booking).await.unwrap();

        let window = TimePeriod::new(0, 24 * HOUR_MS).on_date(booking.reservations[0].date);
        assert_eq!(repo.find_reservations_for(cal, &window).await.unwrap().len(), 1);
        assert!(repo.find_reservations_for(other, &window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn log_append_does_not_bump_version() {
        let repo = InMemoryRepository::new();
        let booking = Booking::new(Ulid::new(), vec![]);
        repo.save_booking(&booking).await.unwrap();
        let entry = LogEntry {
            timestamp: 1,
            author_id: None,
            message: "hello".into(),
        };
        repo.append_booking_log(booking.id, &entry).await.unwrap();
        let stored = repo.get_booking(&booking.id).unwrap();
        assert_eq!(stored.logs, vec![entry]);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn log_append_for_unknown_entity_fails() {
        let repo = InMemoryRepository::new();
        let entry = LogEntry {
            timestamp: 1,
            author_id: None,
            message: "lost".into(),
        };
        assert!(repo.append_payment_log(Ulid::new(), &entry).await.is_err());
    }

    #[tokio::test]
    async fn expired_pending_payments() {
        let repo = InMemoryRepository::new();
        let mut due = Payment::new(Ulid::new(), "cash", None);
        due.status = PaymentStatus::Pending;
        due.pending_expires_at = Some(100);
        let mut later = Payment::new(Ulid::new(), "cash", None);
        later.status = PaymentStatus::Pending;
        later.pending_expires_at = Some(1_000);
        let mut settled = Payment::new(Ulid::new(), "cash", None);
        settled.status = PaymentStatus::Completed;
        settled.pending_expires_at = Some(50);
        for p in [&due, &later, &settled] {
            repo.save_payment(p).await.unwrap();
        }
        assert_eq!(repo.find_expired_pending_payments(500).await.unwrap(), vec![due.id]);
    }
}
