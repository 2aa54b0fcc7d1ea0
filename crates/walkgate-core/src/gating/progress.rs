use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::engine::goal_reached;

/// Progress toward today's goal, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateProgress {
    pub step_count: u64,
    pub threshold: u64,
    pub reblock_at: NaiveTime,
}

impl GateProgress {
    pub fn new(step_count: u64, threshold: u64, reblock_at: NaiveTime) -> Self {
        Self {
            step_count,
            threshold,
            reblock_at,
        }
    }

    /// 0.0 ..= 1.0, or `None` when no threshold is set.
    pub fn fraction(&self) -> Option<f64> {
        if self.threshold == 0 {
            return None;
        }
        Some((self.step_count as f64 / self.threshold as f64).min(1.0))
    }

    pub fn reached(&self) -> bool {
        goal_reached(self.step_count, self.threshold)
    }

    /// Steps still needed today.
    pub fn remaining(&self) -> u64 {
        self.threshold.saturating_sub(self.step_count)
    }

    pub fn status_line(&self) -> String {
        if self.reached() {
            format!(
                "You've reached your step count for the day. Your apps will be blocked again at {} tomorrow.",
                self.reblock_label()
            )
        } else {
            "Keep walking to unblock your apps.".to_string()
        }
    }

    /// "4am", "4:30am", "12pm".
    fn reblock_label(&self) -> String {
        if self.reblock_at.minute() == 0 {
            self.reblock_at.format("%-I%P").to_string()
        } else {
            self.reblock_at.format("%-I:%M%P").to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_am() -> NaiveTime {
        NaiveTime::from_hms_opt(4, 0, 0).unwrap()
    }

    #[test]
    fn fraction_is_clamped() {
        let p = GateProgress::new(12_000, 5000, four_am());
        assert_eq!(p.fraction(), Some(1.0));
        let p = GateProgress::new(2500, 5000, four_am());
        assert_eq!(p.fraction(), Some(0.5));
    }

    #[test]
    fn zero_threshold_has_no_fraction_but_is_reached() {
        let p = GateProgress::new(0, 0, four_am());
        assert_eq!(p.fraction(), None);
        assert!(p.reached());
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn status_lines() {
        assert_eq!(
            GateProgress::new(10, 5000, four_am()).status_line(),
            "Keep walking to unblock your apps."
        );
        assert_eq!(
            GateProgress::new(5000, 5000, four_am()).status_line(),
            "You've reached your step count for the day. Your apps will be blocked again at 4am tomorrow."
        );
        let half_past = NaiveTime::from_hms_opt(4, 30, 0).unwrap();
        assert!(GateProgress::new(1, 1, half_past).status_line().contains("4:30am"));
    }
}
