//! Timezone helpers for display fields and "today" boundaries.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const DATE_FORMAT: &str = "%Y/%m/%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Renders `ts` as `(date, time)` in `tz`.
pub fn display_date_time(ts: DateTime<Utc>, tz: Tz) -> (String, String) {
    let local = ts.with_timezone(&tz);
    (
        local.format(DATE_FORMAT).to_string(),
        local.format(TIME_FORMAT).to_string(),
    )
}

/// Instant of the most recent local midnight in `tz` at or before `now`.
///
/// On days where midnight does not exist (DST gap) the earliest valid local
/// time of that day is used.
pub fn start_of_day(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = now.with_timezone(&tz).date_naive();
    let midnight = local_date.and_time(NaiveTime::MIN);

    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            (1..=3).find_map(|h| {
                let t = midnight + chrono::Duration::hours(h);
                tz.from_local_datetime(&t).earliest()
            })
        })
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| {
            Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
                .single()
                .unwrap_or(now)
        })
}
