//! Minimal SQL AST for push-down aggregation queries
//!
//! Covers what the aggregators need: CTEs, `UNNEST` joins over array columns, AND-ed filters,
//! plain grouping expressions next to a `CUBE`, `CASE` expressions, `UNION ALL` and aliased
//! select fields. Rendering targets a Trino/Presto dialect.

use std::fmt;

/// Label of a rolled-up grouping value
pub const ROLLUP_LABEL: &str = "ALL";

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    StringLiteral(String),
    Number(f64),
    Star,
    Call { function: String, args: Vec<Expr> },
    Binary { left: Box<Expr>, op: &'static str, right: Box<Expr> },
    /// `IF(GROUPING(col) = 1, 'ALL', col)`: marks rows rolled up over `col`
    RollupLabel(String),
    /// `CASE WHEN .. THEN .. END`; first matching branch wins
    Case { branches: Vec<(Expr, Expr)>, otherwise: Option<Box<Expr>> },
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    pub fn lit(value: impl Into<String>) -> Self {
        Self::StringLiteral(value.into())
    }

    pub fn num(value: f64) -> Self {
        Self::Number(value)
    }

    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call { function: function.into(), args }
    }

    pub fn rollup_label(column: impl Into<String>) -> Self {
        Self::RollupLabel(column.into())
    }

    pub fn eq(self, other: Expr) -> Self {
        self.binary("=", other)
    }

    pub fn gte(self, other: Expr) -> Self {
        self.binary(">=", other)
    }

    pub fn and(self, other: Expr) -> Self {
        self.binary("AND", other)
    }

    pub fn minus(self, other: Expr) -> Self {
        self.binary("-", other)
    }

    pub fn case(branches: Vec<(Expr, Expr)>, otherwise: Option<Expr>) -> Self {
        Self::Case { branches, otherwise: otherwise.map(Box::new) }
    }

    pub fn binary(self, op: &'static str, other: Expr) -> Self {
        Self::Binary { left: Box::new(self), op, right: Box::new(other) }
    }

    /// `column.field` access on a row-typed column
    pub fn field(base: &str, field: &str) -> Self {
        Self::Column(format!("{}.{}", base, field))
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => f.write_str(name),
            Self::StringLiteral(value) => write!(f, "'{}'", escape_literal(value)),
            Self::Number(value) => write!(f, "{}", value),
            Self::Star => f.write_str("*"),
            Self::Call { function, args } => {
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            },
            Self::Binary { left, op, right } if matches!(*op, "AND" | "-") => {
                write!(f, "({} {} {})", left, op, right)
            },
            Self::Binary { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Self::RollupLabel(column) => {
                write!(f, "IF(GROUPING({col}) = 1, '{label}', {col})", col = column, label = ROLLUP_LABEL)
            },
            Self::Case { branches, otherwise } => {
                f.write_str("CASE")?;
                for (condition, value) in branches {
                    write!(f, " WHEN {} THEN {}", condition, value)?;
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                f.write_str(" END")
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectField {
    pub expr: Expr,
    pub alias: String,
}

impl SelectField {
    pub fn new(expr: Expr, alias: impl Into<String>) -> Self {
        Self { expr, alias: alias.into() }
    }
}

impl fmt::Display for SelectField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} AS {}", self.expr, self.alias)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Table { database: String, table: String },
    /// A CTE defined on the enclosing query
    Named(String),
}

/// `CROSS JOIN UNNEST(array_column) [WITH ORDINALITY] AS table_alias(element_alias[, ordinal_alias])`
#[derive(Debug, Clone, PartialEq)]
pub struct Unnest {
    pub array_column: String,
    pub table_alias: String,
    pub element_alias: String,
    /// 1-based position of the element in its array
    pub ordinal_alias: Option<String>,
}

impl fmt::Display for Unnest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CROSS JOIN UNNEST({})", self.array_column)?;
        match &self.ordinal_alias {
            Some(ordinal) => {
                write!(f, " WITH ORDINALITY AS {}({}, {})", self.table_alias, self.element_alias, ordinal)
            },
            None => write!(f, " AS {}({})", self.table_alias, self.element_alias),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupBy {
    pub columns: Vec<Expr>,
    pub cube: Vec<Expr>,
}

impl GroupBy {
    fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.cube.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    ctes: Vec<(String, SelectQuery)>,
    fields: Vec<SelectField>,
    source: TableSource,
    unnests: Vec<Unnest>,
    conditions: Vec<Expr>,
    group_by: GroupBy,
    union_all: Vec<SelectQuery>,
}

impl SelectQuery {
    pub fn from_table(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self::from_source(TableSource::Table { database: database.into(), table: table.into() })
    }

    pub fn from_cte(name: impl Into<String>) -> Self {
        Self::from_source(TableSource::Named(name.into()))
    }

    fn from_source(source: TableSource) -> Self {
        Self {
            ctes: Vec::new(),
            fields: Vec::new(),
            source,
            unnests: Vec::new(),
            conditions: Vec::new(),
            group_by: GroupBy::default(),
            union_all: Vec::new(),
        }
    }

    pub fn with_cte(mut self, name: impl Into<String>, query: SelectQuery) -> Self {
        self.ctes.push((name.into(), query));
        self
    }

    pub fn unnest(
        mut self,
        array_column: impl Into<String>,
        table_alias: impl Into<String>,
        element_alias: impl Into<String>,
    ) -> Self {
        self.unnests.push(Unnest {
            array_column: array_column.into(),
            table_alias: table_alias.into(),
            element_alias: element_alias.into(),
            ordinal_alias: None,
        });
        self
    }

    /// Like [`SelectQuery::unnest`], also exposing each element's position as `ordinal_alias`
    pub fn unnest_with_ordinality(
        mut self,
        array_column: impl Into<String>,
        table_alias: impl Into<String>,
        element_alias: impl Into<String>,
        ordinal_alias: impl Into<String>,
    ) -> Self {
        self.unnests.push(Unnest {
            array_column: array_column.into(),
            table_alias: table_alias.into(),
            element_alias: element_alias.into(),
            ordinal_alias: Some(ordinal_alias.into()),
        });
        self
    }

    pub fn select(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.fields.push(SelectField::new(expr, alias));
        self
    }

    pub fn select_fields(mut self, fields: impl IntoIterator<Item = SelectField>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn filter(mut self, condition: Expr) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.columns.push(expr);
        self
    }

    pub fn cube(mut self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.group_by.cube.extend(exprs);
        self
    }

    /// Append the rows of `other`, which must select the same columns in the same order
    pub fn union_all(mut self, other: SelectQuery) -> Self {
        self.union_all.push(other);
        self
    }

    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.ctes.is_empty() {
            f.write_str("WITH ")?;
            for (i, (name, query)) in self.ctes.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{} AS ({})", name, query)?;
            }
            f.write_str(" ")?;
        }

        f.write_str("SELECT ")?;
        if self.fields.is_empty() {
            f.write_str("*")?;
        }
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", field)?;
        }

        match &self.source {
            TableSource::Table { database, table } => {
                write!(f, " FROM {}.{}", quote_identifier(database), quote_identifier(table))?
            },
            TableSource::Named(name) => write!(f, " FROM {}", name)?,
        }

        for unnest in &self.unnests {
            write!(f, " {}", unnest)?;
        }

        for (i, condition) in self.conditions.iter().enumerate() {
            f.write_str(if i == 0 { " WHERE " } else { " AND " })?;
            write!(f, "{}", condition)?;
        }

        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            let mut parts: Vec<String> = self.group_by.columns.iter().map(|e| e.to_string()).collect();
            if !self.group_by.cube.is_empty() {
                let cube: Vec<String> = self.group_by.cube.iter().map(|e| e.to_string()).collect();
                parts.push(format!("CUBE({})", cube.join(", ")));
            }
            f.write_str(&parts.join(", "))?;
        }

        for other in &self.union_all {
            write!(f, " UNION ALL {}", other)?;
        }

        Ok(())
    }
}
