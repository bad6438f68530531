//! Read-only aggregate statistics over the stored incidents.
//!
//! Counting and grouping run in `DuckDB`; blank-label bucketing, zero-filling
//! of missing days and slots, and tie-breaking happen here so the results
//! do not depend on SQL collation or whitespace rules.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime};
use wijkagent_incident_models::{
    DayCount, Incident, LabelCount, MonthComparison, TimeSlot, TimeSlotCount, UNKNOWN_LABEL,
};

use crate::convert::{
    RawIncidentRow, SELECT_COLUMNS, count_to_u64, format_day_start, format_timestamp, now_local,
};
use crate::{DbError, IncidentRepository};

/// Column a label aggregate groups on.
#[derive(Debug, Clone, Copy)]
enum LabelColumn {
    Type,
    City,
}

impl LabelColumn {
    const fn sql(self) -> &'static str {
        match self {
            Self::Type => "incident_type",
            Self::City => "city",
        }
    }
}

impl IncidentRepository {
    /// Total number of stored incidents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn total_count(&self) -> Result<u64, DbError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(count_to_u64(count))
    }

    /// Number of incidents with `from <= incident_at < to`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn count_between(&self, from: &NaiveDateTime, to: &NaiveDateTime) -> Result<u64, DbError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM incidents
             WHERE incident_at >= CAST(? AS TIMESTAMP)
               AND incident_at < CAST(? AS TIMESTAMP)",
            [format_timestamp(from), format_timestamp(to)],
            |row| row.get(0),
        )?;
        Ok(count_to_u64(count))
    }

    /// Counts for the current and the previous local calendar month.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a query fails.
    pub fn month_comparison(&self) -> Result<MonthComparison, DbError> {
        self.month_comparison_at(now_local().date())
    }

    /// Counts for the calendar month containing `today` and the month
    /// before it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a query fails or the month arithmetic leaves
    /// the supported date range.
    pub fn month_comparison_at(&self, today: NaiveDate) -> Result<MonthComparison, DbError> {
        let current_start = today.with_day(1).ok_or_else(|| out_of_range(today))?;
        let next_start = current_start
            .checked_add_months(Months::new(1))
            .ok_or_else(|| out_of_range(today))?;
        let previous_start = current_start
            .checked_sub_months(Months::new(1))
            .ok_or_else(|| out_of_range(today))?;

        let current = self.count_between(&midnight(current_start), &midnight(next_start))?;
        let previous = self.count_between(&midnight(previous_start), &midnight(current_start))?;

        Ok(MonthComparison { current, previous })
    }

    /// The `limit` most common incident types, most common first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn top_types(&self, limit: usize) -> Result<Vec<LabelCount>, DbError> {
        self.top_labels(LabelColumn::Type, limit)
    }

    /// The `limit` cities with the most incidents, most first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn top_cities(&self, limit: usize) -> Result<Vec<LabelCount>, DbError> {
        self.top_labels(LabelColumn::City, limit)
    }

    fn top_labels(&self, column: LabelColumn, limit: usize) -> Result<Vec<LabelCount>, DbError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let raw: Vec<(String, i64)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {col}, COUNT(*) FROM incidents GROUP BY {col}",
                col = column.sql()
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
        for (label, count) in raw {
            let trimmed = label.trim();
            let key = if trimmed.is_empty() {
                UNKNOWN_LABEL.to_string()
            } else {
                label
            };
            *buckets.entry(key).or_default() += count_to_u64(count);
        }

        let mut counts: Vec<LabelCount> = buckets
            .into_iter()
            .map(|(label, count)| LabelCount { label, count })
            .collect();
        // Stable sort keeps the label order from the BTreeMap for ties.
        counts.sort_by(|a, b| b.count.cmp(&a.count));
        counts.truncate(limit);

        Ok(counts)
    }

    /// Counts per 6-hour time-of-day window. Always returns all four slots
    /// in time-of-day order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn counts_by_time_slot(&self) -> Result<Vec<TimeSlotCount>, DbError> {
        let per_hour: Vec<(i64, i64)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT hour(incident_at) AS h, COUNT(*) FROM incidents GROUP BY h",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut by_slot: BTreeMap<TimeSlot, u64> = TimeSlot::all().iter().map(|s| (*s, 0)).collect();
        for (hour, count) in per_hour {
            let slot = TimeSlot::from_hour(u32::try_from(hour).unwrap_or(0));
            *by_slot.entry(slot).or_default() += count_to_u64(count);
        }

        Ok(by_slot
            .into_iter()
            .map(|(slot, count)| TimeSlotCount { slot, count })
            .collect())
    }

    /// Counts per local calendar day for the last `days` days ending today,
    /// oldest first, including days without incidents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn counts_per_day(&self, days: u32) -> Result<Vec<DayCount>, DbError> {
        self.counts_per_day_at(days, now_local().date())
    }

    /// Counts per calendar day for the `days` days ending on (and including)
    /// `today`, oldest first, including days without incidents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the window leaves the
    /// supported date range.
    pub fn counts_per_day_at(&self, days: u32, today: NaiveDate) -> Result<Vec<DayCount>, DbError> {
        if days == 0 {
            return Ok(Vec::new());
        }

        let first = today
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .ok_or_else(|| out_of_range(today))?;
        let end = today
            .checked_add_days(Days::new(1))
            .ok_or_else(|| out_of_range(today))?;

        let per_day: Vec<(String, i64)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT strftime(incident_at, '%Y-%m-%d') AS day, COUNT(*)
                 FROM incidents
                 WHERE incident_at >= CAST(? AS TIMESTAMP)
                   AND incident_at < CAST(? AS TIMESTAMP)
                 GROUP BY day",
            )?;
            let rows = stmt
                .query_map([format_day_start(first), format_day_start(end)], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut counts: BTreeMap<NaiveDate, u64> = first
            .iter_days()
            .take_while(|day| *day <= today)
            .map(|day| (day, 0))
            .collect();
        for (day, count) in per_day {
            let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
                DbError::Conversion {
                    message: format!("invalid day {day:?}: {e}"),
                }
            })?;
            *counts.entry(date).or_default() += count_to_u64(count);
        }

        Ok(counts
            .into_iter()
            .map(|(date, count)| DayCount { date, count })
            .collect())
    }

    /// The most recently created incident.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn latest(&self) -> Result<Option<Incident>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM incidents ORDER BY created_at DESC, id DESC LIMIT 1"
        ))?;
        match stmt.query_row([], RawIncidentRow::from_row) {
            Ok(raw) => raw.into_incident().map(Some),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }
}

fn midnight(day: NaiveDate) -> NaiveDateTime {
    day.and_time(chrono::NaiveTime::MIN)
}

fn out_of_range(day: NaiveDate) -> DbError {
    DbError::Conversion {
        message: format!("date arithmetic out of range around {day}"),
    }
}

#[cfg(test)]
mod tests {
    use wijkagent_incident_models::NewIncident;

    use super::*;
    use crate::repository::tests::{at, new_incident};

    fn seeded() -> IncidentRepository {
        let repo = IncidentRepository::open_in_memory().unwrap();
        for (uid, incident_type, city, day) in [
            ("1", "Diefstal", "Amsterdam", 9),
            ("2", "Overlast", "Amsterdam", 8),
            ("3", "Diefstal", "Rotterdam", 9),
            ("4", "Vandalisme", "Den Haag", 7),
        ] {
            repo.add(new_incident(uid, incident_type, city, at(2025, 3, day, 12)))
                .unwrap();
        }
        repo
    }

    #[test]
    fn total_count() {
        assert_eq!(seeded().total_count().unwrap(), 4);
        assert_eq!(
            IncidentRepository::open_in_memory()
                .unwrap()
                .total_count()
                .unwrap(),
            0
        );
    }

    #[test]
    fn count_between_is_half_open() {
        let repo = seeded();
        assert_eq!(
            repo.count_between(&at(2025, 3, 8, 12), &at(2025, 3, 9, 12))
                .unwrap(),
            1
        );
        assert_eq!(
            repo.count_between(&at(2025, 3, 1, 0), &at(2025, 4, 1, 0))
                .unwrap(),
            4
        );
    }

    #[test]
    fn top_types_descending_with_ties_by_label() {
        let counts = seeded().top_types(10).unwrap();
        assert_eq!(
            counts,
            vec![
                LabelCount {
                    label: "Diefstal".to_string(),
                    count: 2
                },
                LabelCount {
                    label: "Overlast".to_string(),
                    count: 1
                },
                LabelCount {
                    label: "Vandalisme".to_string(),
                    count: 1
                },
            ]
        );
        assert_eq!(seeded().top_types(1).unwrap().len(), 1);
        assert!(seeded().top_types(0).unwrap().is_empty());
    }

    #[test]
    fn top_cities() {
        let counts = seeded().top_cities(2).unwrap();
        assert_eq!(counts[0].label, "Amsterdam");
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn blank_labels_are_bucketed() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        repo.add(new_incident("1", "", "", at(2025, 3, 1, 1))).unwrap();
        repo.add(new_incident("2", "  ", " ", at(2025, 3, 1, 2))).unwrap();
        repo.add(new_incident("3", "Diefstal", "Utrecht", at(2025, 3, 1, 3)))
            .unwrap();

        let types = repo.top_types(5).unwrap();
        assert_eq!(types[0].label, UNKNOWN_LABEL);
        assert_eq!(types[0].count, 2);

        let cities = repo.top_cities(5).unwrap();
        assert_eq!(cities[0].label, UNKNOWN_LABEL);
        assert_eq!(cities[0].count, 2);
    }

    #[test]
    fn one_incident_per_time_slot() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        for (uid, hour) in [("a", 2), ("b", 7), ("c", 14), ("d", 23)] {
            repo.add(new_incident(uid, "Diefstal", "Utrecht", at(2025, 3, 1, hour)))
                .unwrap();
        }

        let slots = repo.counts_by_time_slot().unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(
            slots.iter().map(|s| s.slot).collect::<Vec<_>>(),
            TimeSlot::all()
        );
        assert!(slots.iter().all(|s| s.count == 1));
        assert_eq!(slots.iter().map(|s| s.count).sum::<u64>(), 4);
    }

    #[test]
    fn time_slots_for_empty_store() {
        let slots = IncidentRepository::open_in_memory()
            .unwrap()
            .counts_by_time_slot()
            .unwrap();
        assert_eq!(slots.len(), 4);
        assert!(slots.iter().all(|s| s.count == 0));
    }

    #[test]
    fn counts_per_day_zero_fills_in_ascending_order() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let counts = seeded().counts_per_day_at(7, today).unwrap();

        assert_eq!(counts.len(), 7);
        assert_eq!(counts[0].date, NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
        assert_eq!(counts[6].date, today);
        assert!(counts.windows(2).all(|w| w[0].date < w[1].date));

        let by_day: BTreeMap<u32, u64> = counts.iter().map(|c| (c.date.day(), c.count)).collect();
        assert_eq!(by_day[&7], 1);
        assert_eq!(by_day[&8], 1);
        assert_eq!(by_day[&9], 2);
        assert_eq!(by_day[&10], 0);
        assert_eq!(by_day[&4], 0);
    }

    #[test]
    fn counts_per_day_for_zero_days_is_empty() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert!(seeded().counts_per_day_at(0, today).unwrap().is_empty());
    }

    #[test]
    fn counts_per_day_includes_today() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let now = now_local();
        repo.add(new_incident("x", "Diefstal", "Utrecht", now)).unwrap();

        let counts = repo.counts_per_day(7).unwrap();
        assert_eq!(counts.len(), 7);
        assert_eq!(counts[6].date, now.date());
        assert_eq!(counts[6].count, 1);
    }

    #[test]
    fn month_comparison_spans_year_boundary() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        repo.add(new_incident("1", "Diefstal", "Utrecht", at(2024, 12, 31, 23)))
            .unwrap();
        repo.add(new_incident("2", "Diefstal", "Utrecht", at(2025, 1, 1, 0)))
            .unwrap();
        repo.add(new_incident("3", "Diefstal", "Utrecht", at(2025, 1, 15, 9)))
            .unwrap();
        repo.add(new_incident("4", "Diefstal", "Utrecht", at(2024, 11, 30, 9)))
            .unwrap();

        let cmp = repo
            .month_comparison_at(NaiveDate::from_ymd_opt(2025, 1, 20).unwrap())
            .unwrap();
        assert_eq!(cmp.current, 2);
        assert_eq!(cmp.previous, 1);
    }

    #[test]
    fn latest_is_most_recently_created() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        assert!(repo.latest().unwrap().is_none());

        for (uid, created_hour) in [("old", 8), ("new", 20), ("mid", 12)] {
            repo.add(NewIncident {
                created_at: Some(at(2025, 3, 1, created_hour)),
                ..new_incident(uid, "Diefstal", "Utrecht", at(2025, 3, 1, 1))
            })
            .unwrap();
        }

        assert_eq!(repo.latest().unwrap().unwrap().uid, "new");
    }

    #[test]
    fn aggregates_do_not_mutate() {
        let repo = seeded();
        let before = repo.get_all().unwrap();
        let _ = repo.top_types(3).unwrap();
        let _ = repo.counts_by_time_slot().unwrap();
        let _ = repo
            .counts_per_day_at(30, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .unwrap();
        assert_eq!(repo.get_all().unwrap(), before);
    }
}
