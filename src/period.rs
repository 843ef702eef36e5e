use chrono::{Datelike, NaiveDate};

/// Inclusive date range used as the provider query window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    /// Provider timeframe string, e.g. "2024-08-01 2024-08-31".
    pub fn timeframe(&self) -> String {
        format!(
            "{} {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }

    /// Year-month label of the period, e.g. "2024-08". Used for computed tab names.
    pub fn month_label(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

/// Range of the calendar month immediately before `reference`'s month.
///
/// First day of the reference month, minus one day, lands on the last day of
/// the previous month; that month's first day is the range start.
pub fn previous_month_range(reference: NaiveDate) -> TimeRange {
    let first_this_month = reference
        .with_day(1)
        .expect("day 1 exists in every month");
    let last_prev_month = first_this_month
        .pred_opt()
        .expect("reference month has a predecessor");
    let first_prev_month = last_prev_month
        .with_day(1)
        .expect("day 1 exists in every month");
    TimeRange {
        start: first_prev_month,
        end: last_prev_month,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn mid_month_reference() {
        let range = previous_month_range(date(2024, 9, 17));
        assert_eq!(range.start, date(2024, 8, 1));
        assert_eq!(range.end, date(2024, 8, 31));
    }

    #[test]
    fn year_boundary() {
        let range = previous_month_range(date(2025, 1, 15));
        assert_eq!(range.start, date(2024, 12, 1));
        assert_eq!(range.end, date(2024, 12, 31));
    }

    #[test]
    fn leap_february() {
        let range = previous_month_range(date(2024, 3, 1));
        assert_eq!(range.start, date(2024, 2, 1));
        assert_eq!(range.end, date(2024, 2, 29));
    }

    #[test]
    fn first_of_month_reference() {
        let range = previous_month_range(date(2024, 5, 1));
        assert_eq!(range.start, date(2024, 4, 1));
        assert_eq!(range.end, date(2024, 4, 30));
    }

    #[test]
    fn timeframe_and_label() {
        let range = previous_month_range(date(2024, 9, 17));
        assert_eq!(range.timeframe(), "2024-08-01 2024-08-31");
        assert_eq!(range.month_label(), "2024-08");
        assert!(range.start <= range.end);
    }
}
