//! Eligibility filtering
//!
//! Pure predicate deciding whether a work item may be sent right now given
//! the owning user's preference snapshot. No side effects, no I/O; items
//! that fail here stay queued and are re-evaluated on the next cycle.

use crate::types::{UserNotificationPreference, WorkItem};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Decide whether `item` may be dispatched at `now`.
///
/// Returns false when the channel is not configured for the user, when `now`
/// falls inside the user's quiet hours (evaluated in the user's timezone),
/// or when the daily cap is already reached.
pub fn is_eligible(
    item: &WorkItem,
    preference: &UserNotificationPreference,
    now: DateTime<Utc>,
) -> bool {
    if !preference.channel(item.channel).is_usable() {
        return false;
    }

    if in_quiet_hours(preference, now) {
        return false;
    }

    if preference.daily_sent_count >= preference.max_notifications_per_day {
        return false;
    }

    true
}

/// Whether `now` falls inside the user's quiet-hours window, in the user's
/// local time. A missing start or end means quiet hours are not configured.
/// An unparseable zone is treated as "not quiet" so a bad preference row
/// cannot suppress a user forever.
pub fn in_quiet_hours(preference: &UserNotificationPreference, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (preference.quiet_hours_start, preference.quiet_hours_end)
    else {
        return false;
    };

    let local_time = match preference.timezone.parse::<Tz>() {
        Ok(tz) => now.with_timezone(&tz).time(),
        Err(_) => {
            warn!(
                user_id = %preference.user_id,
                timezone = %preference.timezone,
                "unparseable timezone in preference, skipping quiet hours"
            );
            return false;
        }
    };

    time_in_window(local_time, start, end)
}

/// Window membership with midnight wrap: when `start > end` the window wraps
/// and `t` is inside iff `t >= start || t < end`; otherwise inside iff
/// `start <= t < end`.
fn time_in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start > end {
        t >= start || t < end
    } else {
        start <= t && t < end
    }
}
