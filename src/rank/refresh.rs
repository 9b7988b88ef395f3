// Daily refresh rule.
// A cached list goes stale once a day, after the upstream source has finished its own update.

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::cache::RefreshMarker;
use crate::config::RefreshConfig;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// The latest cutoff at or before `now`.
///
/// The cutoff falls daily at `hour_utc:00` plus the buffer. A buffer that
/// carries past midnight moves the cutoff into the next day.
pub fn cutoff(now: DateTime<Utc>, config: &RefreshConfig) -> DateTime<Utc> {
    let offset = i64::from(config.hour_utc.min(23)) * 60 + i64::from(config.buffer_minutes);
    let midnight = now.date_naive().and_time(NaiveTime::default()).and_utc();
    let candidate = midnight + Duration::minutes(offset.rem_euclid(MINUTES_PER_DAY));
    if candidate > now {
        candidate - Duration::days(1)
    } else {
        candidate
    }
}

/// Whether a list guarded by `marker` must be regenerated at `now`, regardless of its TTL.
///
/// True unless the marker shows a regeneration at or after the latest cutoff.
/// A missing marker always forces a refresh.
pub fn should_force_refresh(
    now: DateTime<Utc>,
    marker: Option<&RefreshMarker>,
    config: &RefreshConfig,
) -> bool {
    let cutoff = cutoff(now, config);
    marker.is_none_or(|marker| marker.last_refreshed_at < cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, minute, 0).unwrap()
    }

    fn marker(time: DateTime<Utc>) -> RefreshMarker {
        RefreshMarker {
            last_refreshed_at: time,
        }
    }

    fn config() -> RefreshConfig {
        RefreshConfig {
            hour_utc: 1,
            buffer_minutes: 30,
        }
    }

    #[test]
    fn test_cutoff() {
        assert_eq!(cutoff(at(10, 17, 5), &config()), at(10, 1, 30));
    }

    #[test]
    fn test_marker_from_yesterday_forces_refresh() {
        let m = marker(at(9, 0, 50));
        assert!(should_force_refresh(at(10, 2, 0), Some(&m), &config()));
    }

    #[test]
    fn test_marker_after_todays_cutoff_holds() {
        let m = marker(at(10, 1, 45));
        assert!(!should_force_refresh(at(10, 2, 0), Some(&m), &config()));
    }

    #[test]
    fn test_marker_before_todays_cutoff_forces_refresh() {
        let m = marker(at(10, 1, 10));
        assert!(should_force_refresh(at(10, 2, 0), Some(&m), &config()));
    }

    #[test]
    fn test_cutoff_before_todays_is_yesterdays() {
        assert_eq!(cutoff(at(10, 1, 29), &config()), at(9, 1, 30));
        assert_eq!(cutoff(at(10, 1, 30), &config()), at(10, 1, 30));
    }

    #[test]
    fn test_before_todays_cutoff_yesterdays_refresh_holds() {
        let m = marker(at(9, 12, 0));
        assert!(!should_force_refresh(at(10, 1, 29), Some(&m), &config()));

        let stale = marker(at(8, 12, 0));
        assert!(should_force_refresh(at(10, 1, 29), Some(&stale), &config()));
    }

    #[test]
    fn test_cutoff_past_midnight() {
        let late = RefreshConfig {
            hour_utc: 23,
            buffer_minutes: 90,
        };
        assert_eq!(cutoff(at(10, 0, 29), &late), at(9, 0, 30));
        assert_eq!(cutoff(at(10, 0, 30), &late), at(10, 0, 30));
        assert_eq!(cutoff(at(10, 23, 0), &late), at(10, 0, 30));

        let mut marker_at = None;
        let mut refreshes = 0;
        for day in 10..13 {
            for hour in 0..24 {
                let now = at(day, hour, 0);
                let current = marker_at.map(marker);
                if should_force_refresh(now, current.as_ref(), &late) {
                    refreshes += 1;
                    marker_at = Some(now);
                }
            }
        }
        // The first check, then the first check after each 00:30 cutoff.
        assert_eq!(refreshes, 4);

        let m = marker(at(11, 0, 45));
        assert!(!should_force_refresh(at(11, 22, 0), Some(&m), &late));
        assert!(should_force_refresh(at(12, 1, 0), Some(&m), &late));
    }

    #[test]
    fn test_late_yesterday_marker_does_not_count_today() {
        // Yesterday 23:59 is later in the day than the cutoff but still yesterday.
        let m = marker(at(9, 23, 59));
        assert!(should_force_refresh(at(10, 1, 30), Some(&m), &config()));
    }

    #[test]
    fn test_missing_marker_always_forces() {
        assert!(should_force_refresh(at(10, 3, 0), None, &config()));
        assert!(should_force_refresh(at(10, 0, 5), None, &config()));
    }
}
