//! Schedule grammar (spec §4.E / §6 "Scheduled-job schedule format"):
//! `{days: {monday: bool, ...}, times: ["HH:MM", ...]}`. One cron-like
//! trigger is materialised per `(weekday, time)` pair.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Days {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl Days {
    pub fn enabled_weekdays(&self) -> Vec<Weekday> {
        let mut days = Vec::new();
        if self.monday {
            days.push(Weekday::Mon);
        }
        if self.tuesday {
            days.push(Weekday::Tue);
        }
        if self.wednesday {
            days.push(Weekday::Wed);
        }
        if self.thursday {
            days.push(Weekday::Thu);
        }
        if self.friday {
            days.push(Weekday::Fri);
        }
        if self.saturday {
            days.push(Weekday::Sat);
        }
        if self.sunday {
            days.push(Weekday::Sun);
        }
        days
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub days: Days,
    pub times: Vec<String>,
}

impl Schedule {
    /// At least one enabled day and one time are required (spec §4.E).
    pub fn validate(&self) -> Result<(), String> {
        if self.days.enabled_weekdays().is_empty() {
            return Err("schedule requires at least one enabled day".to_string());
        }
        if self.times.is_empty() {
            return Err("schedule requires at least one time".to_string());
        }
        for t in &self.times {
            if parse_time(t).is_none() {
                return Err(format!("invalid time {t}, expected HH:MM"));
            }
        }
        Ok(())
    }

    /// One trigger per `(weekday, time)` pair — Open Question 2 decision
    /// (SPEC_FULL §4.2): every time in a multi-time schedule gets its own
    /// trigger, not just the first.
    pub fn triggers(&self) -> Vec<(Weekday, NaiveTime)> {
        let mut out = Vec::new();
        for day in self.days.enabled_weekdays() {
            for raw in &self.times {
                if let Some(time) = parse_time(raw) {
                    out.push((day, time));
                }
            }
        }
        out
    }

    pub fn matches(&self, weekday: Weekday, time: NaiveTime) -> bool {
        self.triggers().iter().any(|(d, t)| *d == weekday && *t == time)
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_schedule_with_no_enabled_day() {
        let schedule = Schedule {
            days: Days::default(),
            times: vec!["09:30".to_string()],
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn rejects_schedule_with_no_times() {
        let schedule = Schedule {
            days: Days {
                monday: true,
                ..Default::default()
            },
            times: vec![],
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn multi_time_schedule_yields_one_trigger_per_time() {
        let schedule = Schedule {
            days: Days {
                monday: true,
                wednesday: true,
                ..Default::default()
            },
            times: vec!["09:30".to_string(), "14:30".to_string()],
        };
        assert!(schedule.validate().is_ok());
        assert_eq!(schedule.triggers().len(), 4);
        assert!(schedule.matches(Weekday::Mon, NaiveTime::from_hms_opt(9, 30, 0).unwrap()));
        assert!(schedule.matches(Weekday::Wed, NaiveTime::from_hms_opt(14, 30, 0).unwrap()));
        assert!(!schedule.matches(Weekday::Tue, NaiveTime::from_hms_opt(9, 30, 0).unwrap()));
    }
}
