use super::por::snapshot_table;
use super::{P21Connector, PorOpener, SqlSession, TableSource};
use crate::access_sql::Table;
use crate::errors::{AppError, AppResult};
use crate::models::{Cell, ResultRow};
use once_cell::sync::Lazy;
use regex::Regex;

const TEST_SNAPSHOT_JSON: &str = include_str!("test_snapshot.json");

static SELECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*SELECT\s+(.+?)\s*;?\s*$").expect("select regex"));
static ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(-?\d+(?:\.\d+)?|'[^']*'|NULL)(?:\s+AS\s+\[?([A-Za-z_][A-Za-z0-9_ ]*?)\]?)?$")
        .expect("select item regex")
});

/// Test-mode stand-in for P21. Answers constant selects such as
/// `SELECT 1840 AS value` in-process and refuses anything that would need a
/// live server.
#[derive(Debug, Clone, Default)]
pub struct ConstantSelectConnector;

impl P21Connector for ConstantSelectConnector {
    fn connect(&self) -> AppResult<Box<dyn SqlSession>> {
        Ok(Box::new(ConstantSelectConnector))
    }

    fn describe(&self) -> String {
        "in-process constant selects".to_string()
    }
}

impl SqlSession for ConstantSelectConnector {
    fn query(&mut self, sql: &str) -> AppResult<Vec<ResultRow>> {
        evaluate_constant_select(sql).map(|row| vec![row])
    }
}

pub fn evaluate_constant_select(sql: &str) -> AppResult<ResultRow> {
    let refuse = || {
        AppError::QueryExecution(format!(
            "test source only answers constant selects, got: {}",
            sql.trim()
        ))
    };
    let list = SELECT_RE
        .captures(sql)
        .and_then(|captures| captures.get(1))
        .ok_or_else(refuse)?
        .as_str();

    let mut pairs = Vec::new();
    for (index, item) in list.split(',').enumerate() {
        let captures = ITEM_RE.captures(item.trim()).ok_or_else(refuse)?;
        let literal = captures.get(1).map(|found| found.as_str()).unwrap_or_default();
        let cell = if literal.eq_ignore_ascii_case("null") {
            Cell::Null
        } else if let Some(text) = literal.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
            Cell::Text(text.to_string())
        } else {
            Cell::infer(literal)
        };
        let column = captures
            .get(2)
            .map(|alias| alias.as_str().trim().to_string())
            .unwrap_or_else(|| format!("column{}", index + 1));
        pairs.push((column, cell));
    }
    Ok(ResultRow::from_pairs(pairs))
}

/// Test-mode stand-in for the POR file: a small built-in snapshot with a
/// `Transactions` table.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedSnapshotOpener;

impl PorOpener for EmbeddedSnapshotOpener {
    fn open(&self) -> AppResult<Box<dyn TableSource>> {
        Ok(Box::new(EmbeddedSnapshotOpener))
    }
}

impl TableSource for EmbeddedSnapshotOpener {
    fn load_table(&self, name: &str) -> AppResult<Table> {
        snapshot_table(TEST_SNAPSHOT_JSON.as_bytes(), name, "built-in test snapshot")
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate_constant_select, ConstantSelectConnector, EmbeddedSnapshotOpener};
    use crate::access_sql;
    use crate::adapters::{P21Connector, TableSource};
    use crate::models::{Cell, ResultRow};

    #[test]
    fn constant_selects_evaluate_in_process() {
        assert_eq!(
            evaluate_constant_select("SELECT 1840 AS value").expect("select"),
            ResultRow::from_pairs([("value", Cell::Integer(1840))])
        );
        assert_eq!(
            evaluate_constant_select("select -2.5 as [value], 'x', NULL AS gap;").expect("select"),
            ResultRow::from_pairs([
                ("value", Cell::Number(-2.5)),
                ("column2", Cell::Text("x".to_string())),
                ("gap", Cell::Null),
            ])
        );
    }

    #[test]
    fn live_sql_is_refused() {
        let mut session = ConstantSelectConnector.connect().expect("session");
        let error = session
            .query("SELECT COUNT(*) AS value FROM dbo.oe_hdr WITH (NOLOCK)")
            .expect_err("live sql");
        assert_eq!(error.error_type(), "query_execution");
        assert!(evaluate_constant_select("SELECT GETDATE() AS value").is_err());
    }

    #[test]
    fn embedded_snapshot_answers_transaction_counts() {
        let source = EmbeddedSnapshotOpener;
        let table = source.load_table("transactions").expect("table");
        assert!(!table.rows.is_empty());

        let rows = access_sql::execute(
            "SELECT Count(*) AS value FROM Transactions WHERE MonthOffset = -5",
            |name| source.load_table(name),
        )
        .expect("count");
        assert!(matches!(rows[0].get("value"), Some(Cell::Integer(count)) if *count > 0));

        let error = source.load_table("WorkOrders").expect_err("missing");
        assert_eq!(error.error_type(), "table_not_found");
    }
}
