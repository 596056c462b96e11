use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;

use crate::calendar::{weekday_of, OrgClock};
use crate::model::*;

// ── Slot enumeration ──────────────────────────────────────────────

/// Bookable slot starts (minutes since local midnight) for `date`.
///
/// Walks every weekly rule of that weekday in granularity steps and drops
/// candidates that are already past (when `date` is today), inside a
/// blackout, or already booked. Overlapping rules contribute the same
/// minute once; the result is ascending.
pub fn free_slots(rs: &SalespersonState, date: NaiveDate, clock: &OrgClock, now: Ms) -> Vec<u16> {
    let weekday = weekday_of(date);
    let rules: Vec<&WeeklyRule> = rs.rules_for_weekday(weekday).collect();
    if rules.is_empty() {
        return Vec::new();
    }

    let day = clock.local_day_span(date);
    let blackouts: Vec<&Blackout> = rs.blackouts_touching(&day).collect();
    let booked: HashSet<u16> = rs
        .active_appointments_in(&day)
        .map(|a| clock.local_parts(a.scheduled_at).minute_of_day)
        .collect();

    let today = clock.local_parts(now);
    let cutoff = (today.date == date).then_some(today.minute_of_day);

    let mut slots = BTreeSet::new();
    for rule in rules {
        for minute in rule.candidates() {
            if cutoff.is_some_and(|c| minute <= c) {
                continue;
            }
            let at = clock.instant_at(date, minute);
            if blackouts.iter().any(|b| b.blocks(at)) {
                continue;
            }
            if booked.contains(&minute) {
                continue;
            }
            slots.insert(minute);
        }
    }
    slots.into_iter().collect()
}
