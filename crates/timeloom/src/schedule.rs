//! Schedule Calculator: pure functions over ISO 8601 schedule strings.
//!
//! Three shapes are recognized: a bare instant, `R[n]/DURATION` (repeat
//! starting "now"), and `R[n]/START/DURATION` (repeat starting at `START`).
//! See `job.schedule` in the data model.

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Parsed {
    Instant(DateTime<Utc>),
    Repeat {
        /// Remaining repeat count; `None` means forever.
        count: Option<u32>,
        /// Anchor of the current interval.
        start: DateTime<Utc>,
        period: Duration,
        /// Shape 3 carried an explicit `START` segment in the string.
        explicit_start: bool,
    },
}

/// The outcome of computing the next due instant for a job.
pub struct NextDue {
    /// `None` means "do not reschedule" — the caller removes the record.
    pub due: Option<DateTime<Utc>>,
    /// The schedule string to persist, when it changed.
    pub schedule: Option<String>,
}

/// `next(job)` on insert: the start of the first interval.
pub fn next_on_insert(schedule: Option<&str>, now: DateTime<Utc>) -> Result<NextDue> {
    let parsed = parse(schedule, now)?;
    let due = match parsed {
        Parsed::Instant(t) => t,
        Parsed::Repeat {
            start,
            explicit_start,
            ..
        } => {
            if explicit_start {
                start
            } else {
                now
            }
        }
    };
    Ok(NextDue {
        due: Some(due),
        schedule: None,
    })
}

/// `next(job, update=true)` after a run: the end of the current interval,
/// rewriting `job.schedule` per the drift rule.
pub fn next_on_update(
    schedule: Option<&str>,
    fired_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<NextDue> {
    let parsed = parse(schedule, fired_at)?;
    match parsed {
        Parsed::Instant(_) => Ok(NextDue {
            due: None,
            schedule: None,
        }),
        Parsed::Repeat {
            count,
            start,
            period,
            explicit_start,
        } => {
            if count == Some(1) {
                // Last occurrence already fired; remove after this run.
                return Ok(NextDue {
                    due: None,
                    schedule: Some(format_instant(start)),
                });
            }

            // Drift rule: an explicit-start schedule resets its anchor to
            // "now" instead of advancing by one period, so a job dormant
            // for many periods does not replay a backlog of catch-up runs.
            let new_start = if explicit_start { now } else { start + period };
            let new_count = count.map(|c| c - 1);

            Ok(NextDue {
                due: Some(new_start),
                schedule: Some(format_repeat(new_count, new_start, period)),
            })
        }
    }
}

fn parse(schedule: Option<&str>, fallback_now: DateTime<Utc>) -> Result<Parsed> {
    let s = match schedule {
        None => return Ok(Parsed::Instant(fallback_now)),
        Some(s) if s.is_empty() => return Ok(Parsed::Instant(fallback_now)),
        Some(s) => s,
    };

    if let Some(rest) = s.strip_prefix('R') {
        let slash = rest.find('/').ok_or_else(|| invalid(s, "missing '/' after R[n]"))?;
        let (count_str, remainder) = (&rest[..slash], &rest[slash + 1..]);
        let count = if count_str.is_empty() {
            None
        } else {
            Some(
                count_str
                    .parse::<u32>()
                    .map_err(|_| invalid(s, "repeat count is not a non-negative integer"))?,
            )
        };

        let (start, explicit_start, period_str) = match remainder.find('/') {
            Some(idx) => {
                let start_str = &remainder[..idx];
                let period_str = &remainder[idx + 1..];
                let start = DateTime::parse_from_rfc3339(start_str)
                    .map_err(|e| invalid(s, &format!("bad START: {e}")))?
                    .with_timezone(&Utc);
                (start, true, period_str)
            }
            None => (fallback_now, false, remainder),
        };

        let period = parse_duration(period_str).map_err(|e| invalid(s, &e))?;

        Ok(Parsed::Repeat {
            count,
            start,
            period,
            explicit_start,
        })
    } else {
        let instant = DateTime::parse_from_rfc3339(s)
            .map_err(|e| invalid(s, &format!("not an R-schedule or RFC3339 instant: {e}")))?
            .with_timezone(&Utc);
        Ok(Parsed::Instant(instant))
    }
}

fn invalid(schedule: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidSchedule {
        schedule: schedule.to_string(),
        reason: reason.to_string(),
    }
}

fn format_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn format_repeat(count: Option<u32>, start: DateTime<Utc>, period: Duration) -> String {
    let count_str = count.map(|c| c.to_string()).unwrap_or_default();
    format!(
        "R{}/{}/{}",
        count_str,
        format_instant(start),
        format_duration(period)
    )
}

/// Parse a (subset of) ISO 8601 duration: `P[n]Y[n]M[n]W[n]D[T[n]H[n]M[n]S]`.
/// Calendar units (`Y`, `M` before `T`) are approximated as 365 and 30 days
/// respectively, matching the common fixed-duration interpretation used by
/// recurring job schedules.
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.strip_prefix('P').ok_or("duration must start with 'P'")?;
    let (date_part, time_part) = match s.find('T') {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    };

    let mut total = Duration::zero();
    total = total + scan_units(date_part, &[('Y', 365), ('M', 30), ('W', 7), ('D', 1)])?;

    if let Some(time_part) = time_part {
        let mut num = String::new();
        for c in time_part.chars() {
            if c.is_ascii_digit() || c == '.' {
                num.push(c);
            } else {
                let value: f64 = num
                    .parse()
                    .map_err(|_| format!("bad numeric component in duration time part: {num}"))?;
                num.clear();
                total = total
                    + match c {
                        'H' => Duration::seconds((value * 3600.0) as i64),
                        'M' => Duration::seconds((value * 60.0) as i64),
                        'S' => Duration::milliseconds((value * 1000.0) as i64),
                        other => return Err(format!("unknown duration time unit '{other}'")),
                    };
            }
        }
        if !num.is_empty() {
            return Err("duration time part has a trailing number with no unit".to_string());
        }
    }

    if total <= Duration::zero() {
        return Err("duration must be positive".to_string());
    }

    Ok(total)
}

fn scan_units(s: &str, units: &[(char, i64)]) -> std::result::Result<Duration, String> {
    let mut total = Duration::zero();
    let mut num = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            num.push(c);
        } else {
            let value: i64 = num
                .parse()
                .map_err(|_| format!("bad numeric component in duration date part: {num}"))?;
            num.clear();
            let days_per_unit = units
                .iter()
                .find(|(unit, _)| *unit == c)
                .map(|(_, days)| *days)
                .ok_or_else(|| format!("unknown duration date unit '{c}'"))?;
            total = total + Duration::days(value * days_per_unit);
        }
    }
    if !num.is_empty() {
        return Err("duration date part has a trailing number with no unit".to_string());
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn instant_schedule_due_is_the_instant() {
        let now = t("2030-01-01T00:00:00Z");
        let result = next_on_insert(Some("2030-01-01T00:00:00Z"), now).unwrap();
        assert_eq!(result.due, Some(now));
    }

    #[test]
    fn instant_schedule_removed_on_update() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let result = next_on_update(Some("2030-01-01T00:00:00Z"), now, now).unwrap();
        assert_eq!(result.due, None);
    }

    #[test]
    fn no_schedule_runs_once_now() {
        let now = Utc::now();
        let result = next_on_insert(None, now).unwrap();
        assert_eq!(result.due, Some(now));
    }

    #[test]
    fn shape2_insert_due_is_now() {
        let now = Utc::now();
        let result = next_on_insert(Some("R/PT1M"), now).unwrap();
        assert_eq!(result.due, Some(now));
    }

    #[test]
    fn shape3_insert_due_is_start() {
        let start = t("2030-06-01T00:00:00Z");
        let now = Utc::now();
        let result = next_on_insert(Some(&format!("R/{}/PT1M", format_instant(start))), now).unwrap();
        assert_eq!(result.due, Some(start));
    }

    #[test]
    fn shape2_update_advances_by_one_period_and_becomes_shape3() {
        let fired_at = t("2030-01-01T00:00:00Z");
        let now = fired_at + Duration::seconds(5); // handler took 5s
        let result = next_on_update(Some("R/PT1M"), fired_at, now).unwrap();
        assert_eq!(result.due, Some(fired_at + Duration::minutes(1)));
        assert!(result.schedule.unwrap().starts_with("R/"));
    }

    #[test]
    fn shape3_update_resets_start_to_now_drift_rule() {
        let start = t("2020-01-01T00:00:00Z"); // long dormant
        let schedule = format!("R/{}/PT1M", format_instant(start));
        let now = Utc::now();
        let result = next_on_update(Some(&schedule), start, now).unwrap();

        // Not start + period (which would still be stuck in 2020) but "now".
        assert!(result.due.unwrap() >= now - Duration::seconds(1));
        assert!(result.due.unwrap() <= now + Duration::seconds(1));
    }

    #[test]
    fn last_repeat_rewrites_to_instant_and_signals_removal() {
        let start = t("2030-01-01T00:00:00Z");
        let schedule = format!("R1/{}/PT1M", format_instant(start));
        let now = start + Duration::seconds(1);
        let result = next_on_update(Some(&schedule), start, now).unwrap();

        assert_eq!(result.due, None);
        assert_eq!(result.schedule, Some(format_instant(start)));
    }

    #[test]
    fn repeat_count_decrements() {
        let start = t("2030-01-01T00:00:00Z");
        let schedule = format!("R3/{}/PT1M", format_instant(start));
        let now = start + Duration::seconds(1);
        let result = next_on_update(Some(&schedule), start, now).unwrap();
        assert!(result.schedule.unwrap().starts_with("R2/"));
    }

    #[test]
    fn forever_repeat_stays_forever() {
        let start = t("2030-01-01T00:00:00Z");
        let schedule = format!("R/{}/PT1M", format_instant(start));
        let now = start + Duration::seconds(1);
        let result = next_on_update(Some(&schedule), start, now).unwrap();
        assert!(result.schedule.unwrap().starts_with("R/"));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("PT1H30M").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("P1D").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("PT0.5S").unwrap(), Duration::milliseconds(500));
    }

    #[test]
    fn rejects_malformed_schedule() {
        assert!(parse(Some("garbage"), Utc::now()).is_err());
        assert!(parse(Some("R/notaduration"), Utc::now()).is_err());
    }
}
