//! Scheduling decisions and publish-time parsing
//!
//! Decides whether a requested publish instant is close enough to "now" to
//! publish synchronously, and spreads a fan-out batch over time with a fixed
//! per-destination stagger.

use chrono::{DateTime, Duration, Utc};

use crate::{RedcastError, Result};

/// Requests at most this many whole minutes ahead publish immediately
pub const IMMEDIATE_WINDOW_MINUTES: i64 = 2;

/// Whether a destination publishes now or is left for the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Immediate,
    Deferred,
}

/// Decide with the default two-minute window
pub fn decide(requested: DateTime<Utc>, reference: DateTime<Utc>) -> Dispatch {
    decide_within(requested, reference, IMMEDIATE_WINDOW_MINUTES)
}

/// Decide against an explicit window.
///
/// The difference is taken in whole minutes, truncated toward zero, so a
/// request 2m59s ahead is still inside a two-minute window. Past-due
/// requests are always immediate.
pub fn decide_within(
    requested: DateTime<Utc>,
    reference: DateTime<Utc>,
    window_minutes: i64,
) -> Dispatch {
    if (requested - reference).num_minutes() <= window_minutes {
        Dispatch::Immediate
    } else {
        Dispatch::Deferred
    }
}

/// Publish instant of the destination at `index` in a staggered batch
///
/// # Errors
///
/// Returns `InvalidInput` when the offset leaves the representable range.
pub fn destination_instant(
    base: DateTime<Utc>,
    index: usize,
    interval_minutes: u32,
) -> Result<DateTime<Utc>> {
    i64::try_from(index)
        .ok()
        .and_then(|index| index.checked_mul(i64::from(interval_minutes)))
        .and_then(Duration::try_minutes)
        .and_then(|offset| base.checked_add_signed(offset))
        .ok_or_else(|| {
            RedcastError::InvalidInput(format!(
                "A {} minute stagger puts destination {} out of range",
                interval_minutes,
                index.saturating_add(1)
            ))
        })
}

/// Parse a requested publish instant
///
/// Accepts, in order:
/// - RFC 3339 with an offset: "2025-06-01T15:00:00-04:00"
/// - Relative durations from `now`: "30m", "2h", "1d"
/// - Natural language: "tomorrow 3pm", "next monday 10am"
///
/// # Errors
///
/// Returns `InvalidInput` when no format matches.
pub fn parse_requested_instant(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RedcastError::InvalidInput(
            "Publish time cannot be empty".to_string(),
        ));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(std_duration) = humantime::parse_duration(input) {
        let duration = Duration::from_std(std_duration)
            .map_err(|_| RedcastError::InvalidInput("Duration out of range".to_string()))?;
        return now.checked_add_signed(duration).ok_or_else(|| {
            RedcastError::InvalidInput(format!("Publish time '{}' is out of range", input))
        });
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        RedcastError::InvalidInput(format!("Could not parse publish time '{}': {}", input, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decide_boundaries() {
        let r = reference();
        assert_eq!(decide(r, r), Dispatch::Immediate);
        assert_eq!(decide(r + Duration::minutes(2), r), Dispatch::Immediate);
        assert_eq!(decide(r + Duration::minutes(3), r), Dispatch::Deferred);
        assert_eq!(decide(r - Duration::hours(5), r), Dispatch::Immediate);
    }

    #[test]
    fn test_decide_truncates_to_whole_minutes() {
        let r = reference();
        assert_eq!(decide(r + Duration::seconds(179), r), Dispatch::Immediate);
        assert_eq!(decide(r + Duration::seconds(180), r), Dispatch::Deferred);
    }

    #[test]
    fn test_decide_matches_minute_rule_across_range() {
        let r = reference();
        for secs in (-7_200..=7_200).step_by(37) {
            let t = r + Duration::seconds(secs);
            let expected = if (t - r).num_minutes() <= 2 {
                Dispatch::Immediate
            } else {
                Dispatch::Deferred
            };
            assert_eq!(decide(t, r), expected, "offset {}s", secs);
        }
    }

    #[test]
    fn test_decide_within_custom_window() {
        let r = reference();
        assert_eq!(
            decide_within(r + Duration::minutes(5), r, 5),
            Dispatch::Immediate
        );
        assert_eq!(
            decide_within(r + Duration::minutes(1), r, 0),
            Dispatch::Deferred
        );
    }

    #[test]
    fn test_destination_instant_formula() {
        let base = reference();
        for interval in [0u32, 1, 15, 60] {
            assert_eq!(destination_instant(base, 0, interval).unwrap(), base);
            for i in 0..6usize {
                assert_eq!(
                    destination_instant(base, i, interval).unwrap(),
                    base + Duration::minutes(i as i64 * interval as i64)
                );
            }
        }
    }

    #[test]
    fn test_staggered_batch_crosses_window() {
        let now = reference();
        let base = now + Duration::minutes(10);
        let instants: Vec<_> = (0..3)
            .map(|i| destination_instant(base, i, 15).unwrap())
            .collect();

        assert_eq!(instants[0], now + Duration::minutes(10));
        assert_eq!(instants[1], now + Duration::minutes(25));
        assert_eq!(instants[2], now + Duration::minutes(40));
        assert!(instants.iter().all(|t| decide(*t, now) == Dispatch::Deferred));
    }

    #[test]
    fn test_zero_stagger_shares_instant() {
        let now = reference();
        let base = now + Duration::minutes(1);
        for i in 0..3 {
            let t = destination_instant(base, i, 0).unwrap();
            assert_eq!(t, base);
            assert_eq!(decide(t, now), Dispatch::Immediate);
        }
    }

    #[test]
    fn test_destination_instant_out_of_range() {
        let base = reference();
        assert!(destination_instant(base, 1, u32::MAX).is_ok());

        let err = destination_instant(base, 69, u32::MAX).unwrap_err();
        assert!(matches!(err, RedcastError::InvalidInput(_)));
        assert!(err.to_string().contains("destination 70"));

        assert!(destination_instant(DateTime::<Utc>::MAX_UTC, 1, 1).is_err());
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let parsed = parse_requested_instant("2025-06-01T15:00:00-04:00", reference()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 1, 19, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_relative_duration() {
        let now = reference();
        assert_eq!(
            parse_requested_instant("30m", now).unwrap(),
            now + Duration::minutes(30)
        );
        assert_eq!(
            parse_requested_instant("2h", now).unwrap(),
            now + Duration::hours(2)
        );
    }

    #[test]
    fn test_parse_natural_language() {
        let now = reference();
        let parsed = parse_requested_instant("tomorrow", now).unwrap();
        assert!(parsed > now);
        assert!(parsed - now <= Duration::hours(48));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_requested_instant("", reference()),
            Err(RedcastError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_requested_instant("definitely not a time", reference()),
            Err(RedcastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_duration_past_date_range() {
        for input in ["290000y", "100000000y"] {
            assert!(
                matches!(
                    parse_requested_instant(input, reference()),
                    Err(RedcastError::InvalidInput(_))
                ),
                "{}",
                input
            );
        }
    }
}
