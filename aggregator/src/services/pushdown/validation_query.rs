//! Push-down validation status query
//!
//! Groups validation runs by validator tool and version with `CUBE(platform)`, so one query
//! returns per-platform and cross-platform rows. The latest result of a version is picked by
//! `max_by(.., dateexecuted)`; the engine breaks date ties arbitrarily.

use super::query_builder::{Expr, SelectQuery};
use super::query_runner::QueryResultSet;
use super::{ExecutionTable, PLATFORM_COLUMN, partition_filters, rows_by_platform};
use crate::models::{PartitionKey, ValidationStatusMetric, ValidatorVersionInfo};
use crate::services::aggregation::validation_status::{passing_rate, validator_info};
use std::collections::BTreeMap;

pub const VALIDATIONS_CTE: &str = "validations";

const TOOL: &str = "validatortool";
const TOOL_VERSION: &str = "validatortoolversion";
const NUMBER_OF_RUNS: &str = "number_of_runs";
const PASSING_RUNS: &str = "passing_runs";
const LATEST_IS_VALID: &str = "latest_isvalid";
const LATEST_ERROR_MESSAGE: &str = "latest_errormessage";
const LATEST_DATE_EXECUTED: &str = "latest_dateexecuted";

fn validations_cte(table: &ExecutionTable, key: &PartitionKey) -> SelectQuery {
    let field = |name: &str| Expr::field("validationexecution", name);
    let query = SelectQuery::from_table(&table.database, &table.table)
        .unnest("validationexecutions", "t", "validationexecution")
        .select(Expr::col(PLATFORM_COLUMN), PLATFORM_COLUMN)
        .select(field(TOOL), TOOL)
        .select(field(TOOL_VERSION), TOOL_VERSION)
        .select(field("isvalid"), "isvalid")
        .select(field("dateexecuted"), "dateexecuted")
        .select(field("errormessage"), "errormessage");
    partition_filters(query, key)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationStatusQuery;

impl ValidationStatusQuery {
    pub fn build(&self, table: &ExecutionTable, key: &PartitionKey) -> SelectQuery {
        let executed_at = || Expr::call("from_iso8601_timestamp", vec![Expr::col("dateexecuted")]);
        let latest = |column: &str| Expr::call("max_by", vec![Expr::col(column), executed_at()]);

        SelectQuery::from_cte(VALIDATIONS_CTE)
            .with_cte(VALIDATIONS_CTE, validations_cte(table, key))
            .select(Expr::rollup_label(PLATFORM_COLUMN), PLATFORM_COLUMN)
            .select(Expr::col(TOOL), TOOL)
            .select(Expr::col(TOOL_VERSION), TOOL_VERSION)
            .select(Expr::call("count", vec![Expr::Star]), NUMBER_OF_RUNS)
            .select(Expr::call("count_if", vec![Expr::col("isvalid")]), PASSING_RUNS)
            .select(latest("isvalid"), LATEST_IS_VALID)
            .select(latest("errormessage"), LATEST_ERROR_MESSAGE)
            .select(latest("dateexecuted"), LATEST_DATE_EXECUTED)
            .group_by(Expr::col(TOOL))
            .group_by(Expr::col(TOOL_VERSION))
            .cube([Expr::col(PLATFORM_COLUMN)])
    }

    /// Platform (including `ALL`) -> validation status
    pub fn parse(&self, result: &QueryResultSet) -> BTreeMap<String, ValidationStatusMetric> {
        let mut by_platform = BTreeMap::new();

        for (platform, rows) in rows_by_platform(result) {
            let mut by_tool: BTreeMap<String, Vec<ValidatorVersionInfo>> = BTreeMap::new();

            for row in rows {
                let (Some(tool), Some(version)) = (row.get(TOOL), row.get(TOOL_VERSION)) else {
                    tracing::warn!("Skipping {} validation row without tool or version", platform);
                    continue;
                };
                let runs = row.get_u64(NUMBER_OF_RUNS).unwrap_or(0);
                if runs == 0 {
                    continue;
                }
                let passing = row.get_u64(PASSING_RUNS).unwrap_or(0);

                by_tool.entry(tool.to_string()).or_default().push(ValidatorVersionInfo {
                    name: version.to_string(),
                    is_valid: row.get_bool(LATEST_IS_VALID).unwrap_or(false),
                    date_executed: row.get(LATEST_DATE_EXECUTED).unwrap_or_default().to_string(),
                    error_message: row.get(LATEST_ERROR_MESSAGE).map(str::to_string),
                    number_of_runs: runs,
                    passing_rate: passing_rate(passing, runs),
                });
            }

            let validator_tools: BTreeMap<_, _> = by_tool
                .into_iter()
                .filter_map(|(tool, versions)| validator_info(versions).map(|info| (tool, info)))
                .collect();
            if !validator_tools.is_empty() {
                by_platform.insert(platform, ValidationStatusMetric { validator_tools });
            }
        }

        by_platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_shape() {
        let key = PartitionKey::new("workflow", "github.com", "org", "repo", "main");
        let sql = ValidationStatusQuery.build(&ExecutionTable::new("db", "executions"), &key).to_sql();

        assert!(sql.contains("CROSS JOIN UNNEST(validationexecutions) AS t(validationexecution)"));
        assert!(sql.contains("count_if(isvalid) AS passing_runs"));
        assert!(sql.contains("max_by(isvalid, from_iso8601_timestamp(dateexecuted)) AS latest_isvalid"));
        assert!(sql.ends_with("GROUP BY validatortool, validatortoolversion, CUBE(platform)"));
    }

    #[test]
    fn test_parse_builds_validator_infos() {
        let columns = [
            "platform", TOOL, TOOL_VERSION, NUMBER_OF_RUNS, PASSING_RUNS, LATEST_IS_VALID,
            LATEST_ERROR_MESSAGE, LATEST_DATE_EXECUTED,
        ];
        let row = |values: [Option<&str>; 8]| values.iter().map(|v| v.map(str::to_string)).collect::<Vec<_>>();
        let result = QueryResultSet::new(
            columns.iter().map(|c| c.to_string()).collect(),
            vec![
                row([
                    Some("ALL"), Some("MINIWDL"), Some("1.0"), Some("2"), Some("1"), Some("false"),
                    Some("syntax error"), Some("2023-02-01T00:00:00Z"),
                ]),
                row([
                    Some("ALL"), Some("MINIWDL"), Some("0.9"), Some("1"), Some("1"), Some("true"), None,
                    Some("2023-01-01T00:00:00Z"),
                ]),
            ],
        );

        let parsed = ValidationStatusQuery.parse(&result);
        let info = &parsed["ALL"].validator_tools["MINIWDL"];
        assert_eq!(info.most_recent_version_name, "1.0");
        assert_eq!(info.number_of_runs, 3);
        assert_eq!(info.validator_versions[0].name, "0.9");

        let latest = info.version("1.0").unwrap();
        assert_eq!(latest.passing_rate, 50.0);
        assert!(!latest.is_valid);
        assert_eq!(latest.error_message.as_deref(), Some("syntax error"));
    }
}
