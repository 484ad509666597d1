//! Epoch-millisecond timestamps.
//!
//! Every timestamp column (`sent_at`, `postponed_at`, ping cooldowns) is an
//! `INTEGER` of UTC milliseconds.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Read a stored timestamp back. Out-of-range values saturate to chrono's
/// bounds instead of failing.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .earliest()
        .unwrap_or(if ms.is_negative() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// Rows stamped before the returned value are older than `retention` at `now`.
///
/// A retention too large to subtract keeps everything.
pub fn cutoff_ms(now: DateTime<Utc>, retention: Duration) -> i64 {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| now.checked_sub_signed(retention))
        .map_or(i64::MIN, datetime_to_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_milliseconds() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(ms_to_datetime(datetime_to_ms(dt)), dt);
    }

    #[test]
    fn test_out_of_range_saturates() {
        assert_eq!(ms_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(ms_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        assert_eq!(
            cutoff_ms(now, Duration::from_secs(24 * 60 * 60)),
            datetime_to_ms(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(cutoff_ms(now, Duration::MAX), i64::MIN);
    }
}
