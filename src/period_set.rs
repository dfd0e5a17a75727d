use crate::period::TimePeriod;

/// Non-overlapping periods forming a free/busy calendar. Built fresh per
/// availability check, never shared.
///
/// Every mutation keeps the invariant that no two members intersect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimePeriodSet {
    periods: Vec<TimePeriod>,
}

impl TimePeriodSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_periods<I: IntoIterator<Item = TimePeriod>>(periods: I) -> Self {
        let mut set = Self::new();
        set.merge_periods(periods);
        set
    }

    /// Union `period` into the set.
    ///
    /// The first intersecting member absorbs `period`; whatever else the grown
    /// member now overlaps is diffed away before it is re-inserted.
    pub fn merge_period(&mut self, period: TimePeriod) {
        match self.periods.iter().position(|p| p.intersects(&period)) {
            Some(pos) => {
                let mut grown = self.periods[pos];
                grown.merge(&period);
                self.diff_period(&grown);
                self.periods.push(grown);
            }
            None => self.periods.push(period),
        }
    }

    pub fn merge_periods<I: IntoIterator<Item = TimePeriod>>(&mut self, periods: I) {
        for period in periods {
            self.merge_period(period);
        }
    }

    /// Remove `period`'s range from every member.
    pub fn diff_period(&mut self, period: &TimePeriod) {
        let mut kept = Vec::with_capacity(self.periods.len() + 1);
        for mut member in self.periods.drain(..) {
            if !member.intersects(period) {
                kept.push(member);
            } else if member.is_subperiod_of(period) {
                // fully covered, drop
            } else if period.is_subperiod_of(&member) {
                kept.extend(member.split_by(period));
            } else {
                member.diff(period);
                kept.push(member);
            }
        }
        self.periods = kept;
    }

    pub fn is_empty(&self) -> bool {
        self.periods.iter().all(TimePeriod::is_empty)
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    /// Exact membership of a period as stored.
    pub fn has_period(&self, period: &TimePeriod) -> bool {
        self.periods.iter().any(|p| p == period)
    }

    /// True if a single member covers all of `period`.
    pub fn contains(&self, period: &TimePeriod) -> bool {
        self.periods.iter().any(|p| period.is_subperiod_of(p))
    }

    pub fn intersects(&self, period: &TimePeriod) -> bool {
        self.periods.iter().any(|p| p.intersects(period))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimePeriod> {
        self.periods.iter()
    }

    /// Members ordered by start, empty remnants dropped.
    pub fn sorted(&self) -> Vec<TimePeriod> {
        let mut out: Vec<TimePeriod> = self.periods.iter().copied().filter(|p| !p.is_empty()).collect();
        out.sort_by_key(|p| p.start);
        out
    }

    /// Total covered minutes.
    pub fn total_duration(&self) -> i64 {
        self.periods.iter().map(|p| p.duration().max(0)).sum()
    }
}

impl FromIterator<TimePeriod> for TimePeriodSet {
    fn from_iter<I: IntoIterator<Item = TimePeriod>>(iter: I) -> Self {
        Self::from_periods(iter)
    }
}

impl<'a> IntoIterator for &'a TimePeriodSet {
    type Item = &'a TimePeriod;
    type IntoIter = std::slice::Iter<'a, TimePeriod>;

    fn into_iter(self) -> Self::IntoIter {
        self.periods.iter()
    }
}
