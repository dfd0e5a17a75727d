use ulid::Ulid;

use crate::model::*;
use crate::period::TimePeriod;
use crate::period_set::TimePeriodSet;

/// A reservation already on the calendar, expanded by its own service buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusySlot {
    pub reservation_id: Ulid,
    pub service_id: Ulid,
    pub period: TimePeriod,
    pub capacity: u32,
}

/// Union of the slots' periods.
pub fn busy_set<'a, I: IntoIterator<Item = &'a BusySlot>>(slots: I) -> TimePeriodSet {
    slots.into_iter().map(|s| s.period).collect()
}

// ── Availability Algorithm ────────────────────────────────────────

/// Decides whether a candidate slot of one service fits next to the slots
/// already taken on the same calendar.
///
/// Exclusive slots (other services, or any slot when the service does not
/// share capacity) block on any intersection. Slots of the same shared service
/// only block once the peak head-count plus the request exceeds
/// `max_capacity`.
pub struct AvailabilityChecker<'a> {
    service: &'a Service,
}

impl<'a> AvailabilityChecker<'a> {
    pub fn new(service: &'a Service) -> Self {
        Self { service }
    }

    fn shares_with(&self, slot: &BusySlot) -> bool {
        self.service.is_shared() && slot.service_id == self.service.id
    }

    /// `candidate` must already carry the service buffers.
    pub fn is_available(&self, candidate: &TimePeriod, busy: &[BusySlot], requested: u32) -> bool {
        self.blocking(candidate, busy, requested).is_none()
    }

    /// `None` if the candidate fits, otherwise the reservations in the way
    /// (empty when the request alone exceeds the service capacity).
    pub fn blocking(&self, candidate: &TimePeriod, busy: &[BusySlot], requested: u32) -> Option<Vec<Ulid>> {
        let requested = requested.max(1);
        if requested > self.service.max_capacity.max(1) {
            return Some(Vec::new());
        }

        let (shared, exclusive): (Vec<&BusySlot>, Vec<&BusySlot>) =
            busy.iter().partition(|s| self.shares_with(s));

        if busy_set(exclusive.iter().copied()).intersects(candidate) {
            return Some(
                exclusive
                    .iter()
                    .filter(|s| s.period.intersects(candidate))
                    .map(|s| s.reservation_id)
                    .collect(),
            );
        }

        let overlapping: Vec<(&BusySlot, TimePeriod)> = shared
            .iter()
            .filter_map(|s| s.period.intersection(candidate).map(|p| (*s, p)))
            .collect();
        if overlapping.is_empty() {
            return None;
        }
        let usage: Vec<(TimePeriod, u32)> = overlapping.iter().map(|(s, p)| (*p, s.capacity)).collect();
        if peak_usage(&usage) + requested <= self.service.max_capacity {
            None
        } else {
            Some(overlapping.iter().map(|(s, _)| s.reservation_id).collect())
        }
    }

    /// Periods where a request of `requested` people would not fit.
    pub fn unavailable_periods(&self, busy: &[BusySlot], requested: u32) -> TimePeriodSet {
        let requested = requested.max(1);
        let (shared, exclusive): (Vec<&BusySlot>, Vec<&BusySlot>) =
            busy.iter().partition(|s| self.shares_with(s));
        let mut blocked = busy_set(exclusive);
        if requested > self.service.max_capacity {
            return blocked;
        }
        let usage: Vec<(TimePeriod, u32)> = shared.iter().map(|s| (s.period, s.capacity)).collect();
        let threshold = self.service.max_capacity - requested + 1;
        blocked.merge_periods(saturated_periods(&usage, threshold));
        blocked
    }
}

fn sweep_events(allocs: &[(TimePeriod, u32)]) -> Vec<(Ms, i64)> {
    let mut events: Vec<(Ms, i64)> = Vec::with_capacity(allocs.len() * 2);
    for (period, capacity) in allocs {
        if period.start < period.end {
            events.push((period.start, i64::from(*capacity)));
            events.push((period.end, -i64::from(*capacity)));
        }
    }
    // Ends sort before starts at the same instant: touching slots don't stack.
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    events
}

/// Highest simultaneous head-count across the allocations.
pub fn peak_usage(allocs: &[(TimePeriod, u32)]) -> u32 {
    let mut count: i64 = 0;
    let mut peak: i64 = 0;
    for (_, delta) in sweep_events(allocs) {
        count += delta;
        peak = peak.max(count);
    }
    peak.clamp(0, i64::from(u32::MAX)) as u32
}

/// Sweep-line: time ranges where the head-count is at least `threshold`.
/// Returned sorted and merged.
pub fn saturated_periods(allocs: &[(TimePeriod, u32)], threshold: u32) -> Vec<TimePeriod> {
    if allocs.is_empty() || threshold == 0 {
        return Vec::new();
    }
    let threshold = i64::from(threshold);
    let mut result: Vec<TimePeriod> = Vec::new();
    let mut count: i64 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in sweep_events(allocs) {
        count += delta;
        if count >= threshold && saturated_start.is_none() {
            saturated_start = Some(time);
        } else if count < threshold
            && let Some(start) = saturated_start.take()
            && time > start
        {
            match result.last_mut() {
                Some(last) if last.end >= start => last.end = last.end.max(time),
                _ => result.push(TimePeriod::new(start, time)),
            }
        }
    }
    result
}
