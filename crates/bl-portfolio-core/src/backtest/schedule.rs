use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;

use super::config::RebalanceFrequency;

/// Row indices of scheduled rebalances after the initial allocation.
///
/// Each calendar anchor of the cadence strictly after the first trading day
/// and on or before the last is snapped to the nearest trading day (ties go
/// to the later day). Index 0 is never included; the initial allocation is
/// handled separately.
pub fn rebalance_schedule(dates: &[NaiveDate], frequency: RebalanceFrequency) -> BTreeSet<usize> {
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return BTreeSet::new();
    };
    calendar_anchors(*first, *last, frequency)
        .into_iter()
        .filter_map(|anchor| nearest_index(dates, anchor))
        .filter(|i| *i > 0)
        .collect()
}

/// Calendar dates in `(start, end]` on which the cadence fires.
pub fn calendar_anchors(
    start: NaiveDate,
    end: NaiveDate,
    frequency: RebalanceFrequency,
) -> Vec<NaiveDate> {
    let month_step = match frequency {
        RebalanceFrequency::None => return Vec::new(),
        RebalanceFrequency::Weekly => return mondays(start, end),
        RebalanceFrequency::Monthly => 1,
        RebalanceFrequency::Quarterly => 3,
        RebalanceFrequency::SemiAnnual => 6,
        RebalanceFrequency::Annual => 12,
    };

    let mut anchors = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());
    loop {
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
        let Some(day) = NaiveDate::from_ymd_opt(year, month, 1) else {
            break;
        };
        if day > end {
            break;
        }
        if (month - 1) % month_step == 0 {
            anchors.push(day);
        }
    }
    anchors
}

fn mondays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let offset = (7 - start.weekday().num_days_from_monday()) % 7;
    let mut day = start + Duration::days(if offset == 0 { 7 } else { offset as i64 });
    let mut out = Vec::new();
    while day <= end {
        debug_assert_eq!(day.weekday(), Weekday::Mon);
        out.push(day);
        day += Duration::days(7);
    }
    out
}

fn nearest_index(dates: &[NaiveDate], anchor: NaiveDate) -> Option<usize> {
    let after = dates.partition_point(|d| *d < anchor);
    match (after.checked_sub(1), after < dates.len()) {
        (Some(before), true) => {
            let gap_before = (anchor - dates[before]).num_days();
            let gap_after = (dates[after] - anchor).num_days();
            Some(if gap_before < gap_after { before } else { after })
        }
        (Some(before), false) => Some(before),
        (None, true) => Some(after),
        (None, false) => None,
    }
}
