use chrono::{DateTime, Datelike, Utc};
use strum::{Display, EnumIter};

pub use strum::IntoEnumIterator;

/// ISO-8601 week number, 1..=53. The year is not part of the key.
pub type IsoWeek = u32;
/// Calendar month, 1..=12.
pub type MonthNumber = u32;

#[derive(Debug, PartialEq, Eq, Clone, Copy, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TimePeriod {
    Week,
    Month,
}

impl TimePeriod {
    pub fn from_period_string(period: &str) -> Option<Self> {
        match period {
            "week" | "weekly" => Some(TimePeriod::Week),
            "month" | "monthly" => Some(TimePeriod::Month),
            _ => None,
        }
    }

    pub fn bucket(&self, timestamp: DateTime<Utc>) -> u32 {
        match self {
            TimePeriod::Week => timestamp.iso_week().week(),
            TimePeriod::Month => timestamp.month(),
        }
    }

    pub fn current_bucket(&self) -> u32 {
        self.bucket(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn buckets_follow_iso_calendar() {
        // 2021-01-03 is a Sunday that still belongs to ISO week 53 of 2020.
        let sunday = Utc.with_ymd_and_hms(2021, 1, 3, 12, 0, 0).unwrap();
        assert_eq!(TimePeriod::Week.bucket(sunday), 53);
        assert_eq!(TimePeriod::Month.bucket(sunday), 1);

        let monday = Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap();
        assert_eq!(TimePeriod::Week.bucket(monday), 1);
    }

    #[test]
    fn parses_period_names() {
        for period in TimePeriod::iter() {
            assert_eq!(
                TimePeriod::from_period_string(&period.to_string()),
                Some(period)
            );
        }
        assert_eq!(TimePeriod::from_period_string("quarter"), None);
    }
}
