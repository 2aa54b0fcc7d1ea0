use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone};

use crate::error::ConfigError;

/// Fixed times the decision engine schedules against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Local wall-clock time of the nightly reblock.
    pub reblock_at: NaiveTime,
    /// Delay between step checks while gating is active.
    pub step_check_interval: Duration,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            reblock_at: NaiveTime::from_hms_opt(4, 0, 0).unwrap_or(NaiveTime::MIN),
            step_check_interval: Duration::minutes(15),
        }
    }
}

impl GatePolicy {
    /// Build a policy from configuration values.
    ///
    /// # Errors
    /// Rejects hours above 23, minutes above 59 and a zero interval.
    pub fn from_parts(
        reblock_hour: u32,
        reblock_minute: u32,
        step_check_interval_min: u32,
    ) -> Result<Self, ConfigError> {
        let reblock_at = NaiveTime::from_hms_opt(reblock_hour, reblock_minute, 0).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "gating.reblock_hour".into(),
                message: format!("{reblock_hour:02}:{reblock_minute:02} is not a valid time of day"),
            }
        })?;
        if step_check_interval_min == 0 {
            return Err(ConfigError::InvalidValue {
                key: "gating.step_check_interval_min".into(),
                message: "interval must be at least one minute".into(),
            });
        }
        Ok(Self {
            reblock_at,
            step_check_interval: Duration::minutes(i64::from(step_check_interval_min)),
        })
    }

    /// When the next step check should run, counted from `from`.
    pub fn next_step_check_at(&self, from: &DateTime<Local>) -> DateTime<Local> {
        *from + self.step_check_interval
    }
}

/// The reblock time on the calendar day after `now`.
pub fn next_reblock_at(now: &DateTime<Local>, policy: &GatePolicy) -> DateTime<Local> {
    let today = now.date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    resolve_local(tomorrow.and_time(policy.reblock_at))
}

/// Resolve a local wall-clock time to an instant.
///
/// Ambiguous times (clocks falling back) resolve to the earlier instant.
/// Times inside a gap (clocks springing forward) resolve to the first valid
/// minute after the gap.
fn resolve_local(naive: NaiveDateTime) -> DateTime<Local> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => (1..=180)
            .find_map(|m| Local.from_local_datetime(&(naive + Duration::minutes(m))).earliest())
            .unwrap_or_else(|| Local.from_utc_datetime(&naive)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn default_policy_is_four_am_and_fifteen_minutes() {
        let policy = GatePolicy::default();
        assert_eq!(policy.reblock_at, NaiveTime::from_hms_opt(4, 0, 0).unwrap());
        assert_eq!(policy.step_check_interval, Duration::minutes(15));
    }

    #[test]
    fn reblock_is_next_calendar_day() {
        let now = local(2024, 1, 8, 14, 0);
        assert_eq!(now.weekday(), Weekday::Mon);
        let at = next_reblock_at(&now, &GatePolicy::default());
        assert_eq!(at.weekday(), Weekday::Tue);
        assert_eq!((at.hour(), at.minute()), (4, 0));
    }

    #[test]
    fn reblock_after_midnight_still_targets_tomorrow() {
        let now = local(2024, 1, 9, 0, 30);
        let at = next_reblock_at(&now, &GatePolicy::default());
        assert_eq!(at.date_naive(), now.date_naive().succ_opt().unwrap());
    }

    #[test]
    fn reblock_crosses_month_end() {
        let now = local(2024, 1, 31, 22, 0);
        let at = next_reblock_at(&now, &GatePolicy::default());
        assert_eq!((at.month(), at.day()), (2, 1));
    }

    #[test]
    fn from_parts_validates() {
        assert!(GatePolicy::from_parts(24, 0, 15).is_err());
        assert!(GatePolicy::from_parts(4, 60, 15).is_err());
        assert!(GatePolicy::from_parts(4, 0, 0).is_err());
        let policy = GatePolicy::from_parts(6, 15, 30).unwrap();
        assert_eq!(policy.step_check_interval, Duration::minutes(30));
    }
}
