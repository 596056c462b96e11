use ulid::Ulid;

use crate::calendar::OrgClock;
use crate::model::*;

/// Decide whether the exact instant `at` is bookable, short-circuiting on
/// the first failed check. `exclude` is the appointment being rescheduled,
/// which must not conflict with itself.
///
/// Advisory only: the uniqueness index re-checks under the write lock.
pub fn check_availability(
    rs: &SalespersonState,
    at: Ms,
    exclude: Option<Ulid>,
    clock: &OrgClock,
) -> Availability {
    let local = clock.local_parts(at);

    let mut rules = rs.rules_for_weekday(local.weekday).peekable();
    if rules.peek().is_none() {
        return Availability::Unavailable(UnavailableReason::NoScheduleForDay);
    }
    if !rules.any(|r| r.covers(local.minute_of_day)) {
        return Availability::Unavailable(UnavailableReason::OutsideBusinessHours);
    }
    if rs.is_blacked_out(at) {
        return Availability::Unavailable(UnavailableReason::BlockedByManager);
    }
    if let Some(existing) = rs.booked_at(at)
        && Some(existing) != exclude {
            return Availability::Unavailable(UnavailableReason::AlreadyBooked(existing));
        }
    Availability::Available
}
