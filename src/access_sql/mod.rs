mod eval;
mod parse;

pub use eval::query;
pub use parse::parse;

use crate::errors::{AppError, AppResult};
use crate::models::ResultRow;

/// A table fully loaded into memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<ResultRow>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    /// Builds a table whose column list is the union of the rows' columns in first-seen order.
    pub fn from_rows(name: impl Into<String>, rows: Vec<ResultRow>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for (column, _) in row.columns() {
                if !columns.iter().any(|known| known.eq_ignore_ascii_case(column)) {
                    columns.push(column.to_string());
                }
            }
        }
        Self::new(name, columns, rows)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<SelectColumn>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub column: String,
    pub alias: Option<String>,
}

impl SelectColumn {
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CountTarget {
    All,
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountAggregate {
    pub target: CountTarget,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessQuery {
    pub table: String,
    pub count: Option<CountAggregate>,
    pub projection: Projection,
    pub filters: Vec<Condition>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
}

impl AccessQuery {
    /// Runs the parsed query against `table`, which must be the table named in FROM.
    pub fn run(&self, table: &Table) -> AppResult<Vec<ResultRow>> {
        if !table.name.eq_ignore_ascii_case(&self.table) {
            return Err(AppError::TableNotFound(format!(
                "query targets {} but table {} was supplied",
                self.table, table.name
            )));
        }
        match &self.count {
            Some(aggregate) => eval::count(table, aggregate, &self.filters, self.limit),
            None => query(table, &self.projection, &self.filters, &self.order_by, self.limit),
        }
    }
}

/// Parses `sql`, asks `load` for the FROM table, and runs the query.
///
/// The grammar is a single `SELECT` over one table with an optional
/// `COUNT(*)`/`COUNT(col)` aggregate, `AND`-chained `WHERE` comparisons,
/// `ORDER BY` and `LIMIT` (or Access `TOP n`). Stages always run in the fixed
/// order FROM, COUNT, WHERE, SELECT, ORDER BY, LIMIT regardless of where the
/// clauses appear in the text. Anything outside the grammar is a
/// `QueryExecution` error.
pub fn execute<F>(sql: &str, load: F) -> AppResult<Vec<ResultRow>>
where
    F: FnOnce(&str) -> AppResult<Table>,
{
    let parsed = parse(sql)?;
    let table = load(&parsed.table)?;
    parsed.run(&table)
}
