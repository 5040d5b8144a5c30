//! Calendar policy for periodic triggers

use crate::models::workflow::PeriodicInterval;
use chrono::{DateTime, Datelike, TimeZone, Timelike};

/// Whether a periodic trigger is due at `now` given the previous evaluation time.
///
/// Comparison is on calendar fields, not elapsed time: `daily` fires when the
/// day-of-month differs, so two evaluations exactly one month apart on the same
/// day-of-month do not fire. Both timestamps must be in the same reference zone.
pub fn periodic_due<Tz: TimeZone>(
    interval: PeriodicInterval,
    now: &DateTime<Tz>,
    previous: Option<&DateTime<Tz>>,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    match interval {
        PeriodicInterval::Always => true,
        PeriodicInterval::Daily => now.day() != previous.day(),
        PeriodicInterval::Hourly => now.hour() != previous.hour(),
        PeriodicInterval::Minute => now.minute() != previous.minute(),
    }
}
