//! Calendar-aligned execution counts
//!
//! A [`TimeSeriesWindow`] counts executions in the last N bins ending with the bin that
//! contains "now". Each granularity only supplies a [`BinRule`]; the window logic, the
//! in-process count and the push-down query are shared.

use super::query_builder::{Expr, SelectQuery};
use super::query_runner::QueryResultSet;
use super::{EXECUTIONS_CTE, ExecutionTable, PLATFORM_COLUMN, rows_by_platform, with_executions};
use crate::models::{PartitionKey, TimeSeriesInterval, TimeSeriesMetric};
use crate::utils::parse_timestamp;
use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, Utc};
use std::collections::BTreeMap;

const BIN_START: &str = "bin_start";
const BIN_COUNT: &str = "execution_count";

pub const DEFAULT_DAILY_BINS: usize = 30;
pub const DEFAULT_WEEKLY_BINS: usize = 12;
pub const DEFAULT_MONTHLY_BINS: usize = 12;

pub trait BinRule: Send + Sync {
    fn interval(&self) -> TimeSeriesInterval;

    /// Start of the bin containing `ts`
    fn snap(&self, ts: DateTime<Utc>) -> DateTime<Utc>;

    /// Start of the bin `bins` away from `bin_start`; negative goes into the past
    fn shift(&self, bin_start: DateTime<Utc>, bins: i32) -> DateTime<Utc>;

    /// SQL expression for the start of the bin containing `ts`
    fn sql_bin_start(&self, ts: Expr) -> Expr;
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn date_trunc(unit: &str, ts: Expr) -> Expr {
    Expr::call("date_trunc", vec![Expr::lit(unit), ts])
}

fn date_add(unit: &str, amount: f64, ts: Expr) -> Expr {
    Expr::call("date_add", vec![Expr::lit(unit), Expr::num(amount), ts])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DailyBins;

impl BinRule for DailyBins {
    fn interval(&self) -> TimeSeriesInterval {
        TimeSeriesInterval::Day
    }

    fn snap(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        start_of_day(ts)
    }

    fn shift(&self, bin_start: DateTime<Utc>, bins: i32) -> DateTime<Utc> {
        bin_start + Duration::days(bins as i64)
    }

    fn sql_bin_start(&self, ts: Expr) -> Expr {
        date_trunc("day", ts)
    }
}

/// Weeks start on Sunday
#[derive(Debug, Clone, Copy, Default)]
pub struct WeeklyBins;

impl BinRule for WeeklyBins {
    fn interval(&self) -> TimeSeriesInterval {
        TimeSeriesInterval::Week
    }

    fn snap(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let day = start_of_day(ts);
        day - Duration::days(day.weekday().num_days_from_sunday() as i64)
    }

    fn shift(&self, bin_start: DateTime<Utc>, bins: i32) -> DateTime<Utc> {
        bin_start + Duration::weeks(bins as i64)
    }

    // date_trunc('week') snaps to Monday, so shift into the next day and back
    fn sql_bin_start(&self, ts: Expr) -> Expr {
        date_add("day", -1.0, date_trunc("week", date_add("day", 1.0, ts)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonthlyBins;

impl BinRule for MonthlyBins {
    fn interval(&self) -> TimeSeriesInterval {
        TimeSeriesInterval::Month
    }

    fn snap(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let day = start_of_day(ts);
        day - Duration::days(day.day0() as i64)
    }

    fn shift(&self, bin_start: DateTime<Utc>, bins: i32) -> DateTime<Utc> {
        let months = Months::new(bins.unsigned_abs());
        let shifted =
            if bins >= 0 { bin_start.checked_add_months(months) } else { bin_start.checked_sub_months(months) };
        shifted.unwrap_or(bin_start)
    }

    fn sql_bin_start(&self, ts: Expr) -> Expr {
        date_trunc("month", ts)
    }
}

/// Sliding window of `bins` bins ending with the current one
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesWindow<R: BinRule> {
    rule: R,
    bins: usize,
}

impl TimeSeriesWindow<DailyBins> {
    pub fn daily() -> Self {
        Self::new(DailyBins, DEFAULT_DAILY_BINS)
    }
}

impl TimeSeriesWindow<WeeklyBins> {
    pub fn weekly() -> Self {
        Self::new(WeeklyBins, DEFAULT_WEEKLY_BINS)
    }
}

impl TimeSeriesWindow<MonthlyBins> {
    pub fn monthly() -> Self {
        Self::new(MonthlyBins, DEFAULT_MONTHLY_BINS)
    }
}

impl<R: BinRule> TimeSeriesWindow<R> {
    pub fn new(rule: R, bins: usize) -> Self {
        Self { rule, bins: bins.max(1) }
    }

    pub fn first_bin(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.rule.shift(self.rule.snap(now), -((self.bins - 1) as i32))
    }

    fn bin_index(&self, first_bin: DateTime<Utc>, ts: DateTime<Utc>) -> Option<usize> {
        let snapped = self.rule.snap(ts);
        if snapped < first_bin {
            return None;
        }
        (0..self.bins).find(|&i| self.rule.shift(first_bin, i as i32) == snapped)
    }

    /// Window filled from (bin start, count) pairs; bins outside the window are ignored
    pub fn from_counts(
        &self,
        counts: impl IntoIterator<Item = (DateTime<Utc>, u64)>,
        now: DateTime<Utc>,
    ) -> TimeSeriesMetric {
        let begins = self.first_bin(now);
        let mut values = vec![0.0; self.bins];
        for (ts, count) in counts {
            if let Some(idx) = self.bin_index(begins, ts) {
                values[idx] += count as f64;
            }
        }
        TimeSeriesMetric { begins, interval: self.rule.interval(), values }
    }

    /// Count executions in-process from their `dateExecuted`
    ///
    /// Unparseable dates are logged and left out.
    pub fn count_dates<'a>(&self, dates: impl IntoIterator<Item = &'a str>, now: DateTime<Utc>) -> TimeSeriesMetric {
        let parsed = dates.into_iter().filter_map(|date| match parse_timestamp(date) {
            Ok(ts) => Some((ts, 1)),
            Err(e) => {
                tracing::warn!("Not counting execution in time series: {}", e);
                None
            },
        });
        self.from_counts(parsed, now)
    }

    pub fn build(&self, table: &ExecutionTable, key: &PartitionKey, now: DateTime<Utc>) -> SelectQuery {
        let executed_at = || {
            Expr::call("from_iso8601_timestamp", vec![Expr::col("dateexecuted")])
                .binary("AT TIME ZONE", Expr::lit("UTC"))
        };
        let bin_start = || self.rule.sql_bin_start(executed_at());
        let window_start = Expr::call("from_iso8601_timestamp", vec![Expr::lit(self.first_bin(now).to_rfc3339())]);

        with_executions(SelectQuery::from_cte(EXECUTIONS_CTE), table, key)
            .select(Expr::rollup_label(PLATFORM_COLUMN), PLATFORM_COLUMN)
            .select(Expr::call("to_iso8601", vec![bin_start()]), BIN_START)
            .select(Expr::call("count", vec![Expr::Star]), BIN_COUNT)
            .filter(executed_at().gte(window_start))
            .group_by(bin_start())
            .cube([Expr::col(PLATFORM_COLUMN)])
    }

    /// Platform (including `ALL`) -> window
    pub fn parse(&self, result: &QueryResultSet, now: DateTime<Utc>) -> BTreeMap<String, TimeSeriesMetric> {
        rows_by_platform(result)
            .into_iter()
            .map(|(platform, rows)| {
                let counts: Vec<(DateTime<Utc>, u64)> = rows
                    .iter()
                    .filter_map(|row| {
                        let start = row.get(BIN_START).and_then(|s| parse_timestamp(s).ok())?;
                        Some((start, row.get_u64(BIN_COUNT).unwrap_or(0)))
                    })
                    .collect();
                (platform, self.from_counts(counts, now))
            })
            .collect()
    }
}
