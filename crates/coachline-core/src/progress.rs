//! Progress aggregation over immutable habit log entries.
//!
//! Pure functions: the same entries always reduce to the same numbers. Values
//! logged on the same calendar day add up. Percentages are not clamped, so a
//! day over target reports more than 100.

use crate::model::{Frequency, Habit, HabitLogEntry};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use thiserror::Error;

/// Aggregation failures. Both are configuration problems, never user input.
#[derive(Debug, Error, PartialEq)]
pub enum ProgressError {
    #[error("habit {habit_id} has no usable target ({target})")]
    InvalidTarget { habit_id: String, target: f64 },

    #[error("range starts on {from} after it ends on {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
}

/// Completion for one bucket: a calendar day for daily habits, the part of an
/// ISO week inside the requested range for weekly ones.
#[derive(Debug, Clone, PartialEq)]
pub struct DayProgress {
    /// First day of the bucket.
    pub date: NaiveDate,
    /// Last day of the bucket (same as `date` for daily habits).
    pub end: NaiveDate,
    pub completed: f64,
    /// `target - completed`; negative when the target was exceeded.
    pub due: f64,
    pub percentage: f64,
    /// Number of log entries that contributed.
    pub entries: usize,
}

/// Per-bucket rows plus summary statistics for a date range.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub habit_id: String,
    pub client_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub rows: Vec<DayProgress>,
    pub mean_percentage: f64,
    /// Buckets with at least one log entry.
    pub logged_days: usize,
    /// Buckets at or above 100%.
    pub completed_days: usize,
}

/// Calendar date of a timestamp in the given offset.
pub fn local_date(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

/// Progress for the bucket containing `date`. For weekly habits this is the
/// week to date (Monday through `date`).
pub fn progress_on(
    habit: &Habit,
    client_id: &str,
    entries: &[HabitLogEntry],
    date: NaiveDate,
    offset: FixedOffset,
) -> Result<DayProgress, ProgressError> {
    check_target(habit)?;
    let start = bucket_start(date, habit.frequency);
    Ok(reduce(habit, client_id, entries, start, date, offset))
}

/// Per-bucket progress for every bucket overlapping `[from, to]`, clamped to
/// the range, with summary statistics.
pub fn report(
    habit: &Habit,
    client_id: &str,
    entries: &[HabitLogEntry],
    from: NaiveDate,
    to: NaiveDate,
    offset: FixedOffset,
) -> Result<PeriodReport, ProgressError> {
    check_target(habit)?;
    if from > to {
        return Err(ProgressError::InvalidRange { from, to });
    }

    let span = match habit.frequency {
        Frequency::Daily => 0,
        Frequency::Weekly => 6,
    };

    let mut rows = Vec::new();
    let mut start = bucket_start(from, habit.frequency);
    while start <= to {
        let end = start + Duration::days(span);
        rows.push(reduce(
            habit,
            client_id,
            entries,
            start.max(from),
            end.min(to),
            offset,
        ));
        start = end + Duration::days(1);
    }

    let mean_percentage = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|r| r.percentage).sum::<f64>() / rows.len() as f64
    };

    Ok(PeriodReport {
        habit_id: habit.id.clone(),
        client_id: client_id.to_string(),
        from,
        to,
        logged_days: rows.iter().filter(|r| r.entries > 0).count(),
        completed_days: rows.iter().filter(|r| r.percentage >= 100.0).count(),
        mean_percentage,
        rows,
    })
}

fn check_target(habit: &Habit) -> Result<(), ProgressError> {
    if !habit.target.is_finite() || habit.target <= 0.0 {
        return Err(ProgressError::InvalidTarget {
            habit_id: habit.id.clone(),
            target: habit.target,
        });
    }
    Ok(())
}

fn bucket_start(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Daily => date,
        Frequency::Weekly => date - Duration::days(date.weekday().num_days_from_monday() as i64),
    }
}

fn reduce(
    habit: &Habit,
    client_id: &str,
    entries: &[HabitLogEntry],
    start: NaiveDate,
    end: NaiveDate,
    offset: FixedOffset,
) -> DayProgress {
    let mut values: Vec<f64> = entries
        .iter()
        .filter(|e| e.habit_id == habit.id && e.client_id == client_id)
        .filter(|e| {
            let day = local_date(e.logged_at, offset);
            day >= start && day <= end
        })
        .map(|e| e.value)
        .collect();

    // Fixed summation order keeps float totals independent of insertion order.
    values.sort_by(f64::total_cmp);
    let completed: f64 = values.iter().sum();

    DayProgress {
        date: start,
        end,
        completed,
        due: habit.target - completed,
        percentage: 100.0 * completed / habit.target,
        entries: values.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn habit(frequency: Frequency, target: f64) -> Habit {
        Habit {
            id: "h1".into(),
            trainer_id: "TR01A".into(),
            name: "Water".into(),
            target,
            unit: "L".into(),
            frequency,
            created_at: String::new(),
        }
    }

    fn entry(id: i64, value: f64, y: i32, m: u32, d: u32, h: u32) -> HabitLogEntry {
        HabitLogEntry {
            id,
            habit_id: "h1".into(),
            client_id: "AB12C".into(),
            value,
            logged_at: Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_same_day_logs_add_up() {
        let h = habit(Frequency::Daily, 3.0);
        let logs = vec![entry(1, 1.0, 2026, 3, 2, 8), entry(2, 1.5, 2026, 3, 2, 18)];
        let p = progress_on(&h, "AB12C", &logs, day(2026, 3, 2), utc()).unwrap();
        assert!((p.completed - 2.5).abs() < 1e-9);
        assert!((p.due - 0.5).abs() < 1e-9);
        assert!((p.percentage - 83.33).abs() < 0.01);
        assert_eq!(p.entries, 2);
    }

    #[test]
    fn test_no_logs_is_zero_percent() {
        let h = habit(Frequency::Daily, 3.0);
        let p = progress_on(&h, "AB12C", &[], day(2026, 3, 2), utc()).unwrap();
        assert_eq!(p.completed, 0.0);
        assert_eq!(p.percentage, 0.0);
        assert_eq!(p.due, 3.0);
    }

    #[test]
    fn test_exceeding_target_is_not_clamped() {
        let h = habit(Frequency::Daily, 2.0);
        let logs = vec![entry(1, 3.0, 2026, 3, 2, 9)];
        let p = progress_on(&h, "AB12C", &logs, day(2026, 3, 2), utc()).unwrap();
        assert_eq!(p.percentage, 150.0);
        assert_eq!(p.due, -1.0);
    }

    #[test]
    fn test_zero_target_is_config_error() {
        let h = habit(Frequency::Daily, 0.0);
        let err = progress_on(&h, "AB12C", &[], day(2026, 3, 2), utc()).unwrap_err();
        assert!(matches!(err, ProgressError::InvalidTarget { .. }));

        let nan = habit(Frequency::Daily, f64::NAN);
        assert!(progress_on(&nan, "AB12C", &[], day(2026, 3, 2), utc()).is_err());
    }

    #[test]
    fn test_order_independent_and_idempotent() {
        let h = habit(Frequency::Daily, 1.0);
        let mut logs = vec![
            entry(1, 0.1, 2026, 3, 2, 8),
            entry(2, 0.2, 2026, 3, 2, 9),
            entry(3, 0.3, 2026, 3, 2, 10),
            entry(4, 1e-17, 2026, 3, 2, 11),
        ];
        let a = progress_on(&h, "AB12C", &logs, day(2026, 3, 2), utc()).unwrap();
        logs.reverse();
        let b = progress_on(&h, "AB12C", &logs, day(2026, 3, 2), utc()).unwrap();
        let c = progress_on(&h, "AB12C", &logs, day(2026, 3, 2), utc()).unwrap();
        assert_eq!(a.completed.to_bits(), b.completed.to_bits());
        assert_eq!(b, c);
    }

    #[test]
    fn test_other_clients_and_days_are_ignored() {
        let h = habit(Frequency::Daily, 3.0);
        let mut other = entry(1, 5.0, 2026, 3, 2, 8);
        other.client_id = "ZZ99Z".into();
        let logs = vec![other, entry(2, 1.0, 2026, 3, 1, 23), entry(3, 2.0, 2026, 3, 2, 0)];
        let p = progress_on(&h, "AB12C", &logs, day(2026, 3, 2), utc()).unwrap();
        assert_eq!(p.completed, 2.0);
    }

    #[test]
    fn test_offset_moves_late_logs_to_next_day() {
        let h = habit(Frequency::Daily, 3.0);
        let logs = vec![entry(1, 1.0, 2026, 3, 1, 23)];
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let p = progress_on(&h, "AB12C", &logs, day(2026, 3, 2), plus_two).unwrap();
        assert_eq!(p.completed, 1.0);
    }

    #[test]
    fn test_weekly_report_summary() {
        let h = habit(Frequency::Daily, 2.0);
        let logs = vec![
            entry(1, 2.0, 2026, 3, 2, 8),
            entry(2, 1.0, 2026, 3, 3, 8),
            entry(3, 4.0, 2026, 3, 5, 8),
        ];
        let r = report(&h, "AB12C", &logs, day(2026, 3, 2), day(2026, 3, 8), utc()).unwrap();
        assert_eq!(r.rows.len(), 7);
        assert_eq!(r.logged_days, 3);
        assert_eq!(r.completed_days, 2);
        // (100 + 50 + 0 + 200 + 0 + 0 + 0) / 7
        assert!((r.mean_percentage - 350.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_weekly_habit_buckets_by_iso_week() {
        let h = habit(Frequency::Weekly, 3.0);
        // 2026-03-02 is a Monday.
        let logs = vec![entry(1, 1.0, 2026, 3, 2, 8), entry(2, 2.0, 2026, 3, 6, 8)];
        let p = progress_on(&h, "AB12C", &logs, day(2026, 3, 6), utc()).unwrap();
        assert_eq!(p.date, day(2026, 3, 2));
        assert_eq!(p.percentage, 100.0);

        let r = report(&h, "AB12C", &logs, day(2026, 3, 4), day(2026, 3, 15), utc()).unwrap();
        assert_eq!(r.rows.len(), 2);
        assert_eq!(r.rows[0].date, day(2026, 3, 4));
        assert_eq!(r.rows[0].completed, 2.0);
        assert_eq!(r.rows[1].date, day(2026, 3, 9));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let h = habit(Frequency::Daily, 3.0);
        let err = report(&h, "AB12C", &[], day(2026, 3, 5), day(2026, 3, 1), utc()).unwrap_err();
        assert!(matches!(err, ProgressError::InvalidRange { .. }));
    }
}
