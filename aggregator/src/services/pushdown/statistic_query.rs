//! Push-down statistic over one numeric column
//!
//! Select aliases are `{fn}_{column}` so several columns can share one parent query without
//! colliding. A row whose count is zero has no data for the column.

use super::query_builder::{Expr, SelectField};
use super::query_runner::ResultRow;
use crate::models::{COST_UNIT, CPU_UNIT, EXECUTION_TIME_UNIT, MEMORY_UNIT, Statistic, StatisticMetric};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticColumn {
    pub column: &'static str,
    pub unit: &'static str,
}

pub const EXECUTION_TIME_COLUMN: StatisticColumn =
    StatisticColumn { column: "executiontimeseconds", unit: EXECUTION_TIME_UNIT };
pub const CPU_COLUMN: StatisticColumn = StatisticColumn { column: "cpurequirements", unit: CPU_UNIT };
pub const MEMORY_COLUMN: StatisticColumn =
    StatisticColumn { column: "memoryrequirementsgb", unit: MEMORY_UNIT };
pub const COST_COLUMN: StatisticColumn = StatisticColumn { column: "costvalue", unit: COST_UNIT };

const PERCENTILES: [(&str, f64); 3] = [("median", 0.5), ("p05", 0.05), ("p95", 0.95)];

impl StatisticColumn {
    pub fn alias(&self, function: &str) -> String {
        format!("{}_{}", function, self.column)
    }

    pub fn select_fields(&self) -> Vec<SelectField> {
        let column = || Expr::col(self.column);
        let mut fields = vec![
            SelectField::new(Expr::call("min", vec![column()]), self.alias("min")),
            SelectField::new(Expr::call("avg", vec![column()]), self.alias("avg")),
            SelectField::new(Expr::call("max", vec![column()]), self.alias("max")),
            SelectField::new(Expr::call("count", vec![column()]), self.alias("count")),
        ];
        fields.extend(PERCENTILES.iter().map(|(name, p)| {
            SelectField::new(Expr::call("approx_percentile", vec![column(), Expr::num(*p)]), self.alias(name))
        }));
        fields
    }

    pub fn metric_from_row(&self, row: &ResultRow<'_>) -> Option<StatisticMetric> {
        let count = row.get_u64(&self.alias("count")).unwrap_or(0);
        if count == 0 {
            return None;
        }

        let (Some(minimum), Some(average), Some(maximum)) = (
            row.get_f64(&self.alias("min")),
            row.get_f64(&self.alias("avg")),
            row.get_f64(&self.alias("max")),
        ) else {
            tracing::warn!("Row reports {} values of {} but no min/avg/max", count, self.column);
            return None;
        };

        let mut statistic = Statistic::new(minimum, maximum, average, count);
        statistic.median = row.get_f64(&self.alias("median"));
        statistic.percentile_05th = row.get_f64(&self.alias("p05"));
        statistic.percentile_95th = row.get_f64(&self.alias("p95"));
        Some(StatisticMetric::new(statistic, self.unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pushdown::query_runner::QueryResultSet;

    fn result_set(columns: &[&str], values: &[Option<&str>]) -> QueryResultSet {
        QueryResultSet::new(
            columns.iter().map(|c| c.to_string()).collect(),
            vec![values.iter().map(|v| v.map(str::to_string)).collect()],
        )
    }

    #[test]
    fn test_aliases_are_derived_from_column() {
        let aliases: Vec<String> =
            CPU_COLUMN.select_fields().into_iter().map(|f| f.alias).collect();
        assert_eq!(
            aliases,
            vec![
                "min_cpurequirements",
                "avg_cpurequirements",
                "max_cpurequirements",
                "count_cpurequirements",
                "median_cpurequirements",
                "p05_cpurequirements",
                "p95_cpurequirements",
            ]
        );
        assert_eq!(
            CPU_COLUMN.select_fields()[4].expr.to_string(),
            "approx_percentile(cpurequirements, 0.5)"
        );
    }

    #[test]
    fn test_row_to_metric() {
        let set = result_set(
            &["min_costvalue", "avg_costvalue", "max_costvalue", "count_costvalue", "median_costvalue"],
            &[Some("1.0"), Some("2.0"), Some("3.0"), Some("3"), Some("2.0")],
        );
        let metric = COST_COLUMN.metric_from_row(&set.rows().next().unwrap()).unwrap();
        assert_eq!(metric.unit, "USD");
        assert_eq!(metric.statistic.count(), 3);
        assert_eq!(metric.statistic.average, 2.0);
        assert_eq!(metric.statistic.median, Some(2.0));
        assert_eq!(metric.statistic.percentile_95th, None);
    }

    #[test]
    fn test_zero_count_is_no_data() {
        let set = result_set(
            &["min_costvalue", "avg_costvalue", "max_costvalue", "count_costvalue"],
            &[None, None, None, Some("0")],
        );
        assert!(COST_COLUMN.metric_from_row(&set.rows().next().unwrap()).is_none());
    }
}
