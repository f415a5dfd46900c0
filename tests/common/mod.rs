#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tallman_dashboard_lib::adapters::por::AccessFileOpener;
use tallman_dashboard_lib::adapters::{ConnectionResolver, P21Connector, SqlSession};
use tallman_dashboard_lib::config::{AppConfig, PorSettings};
use tallman_dashboard_lib::errors::{AppError, AppResult};
use tallman_dashboard_lib::models::{Cell, MetricDefinition, ResultRow, ServerName};
use tallman_dashboard_lib::App;

/// In-memory stand-in for the P21 ODBC connection: SQL text maps to a fixed result.
#[derive(Clone, Default)]
pub struct ScriptedP21 {
    results: Arc<HashMap<String, Vec<ResultRow>>>,
}

impl ScriptedP21 {
    pub fn new(results: HashMap<String, Vec<ResultRow>>) -> Self {
        Self {
            results: Arc::new(results),
        }
    }
}

impl SqlSession for ScriptedP21 {
    fn query(&mut self, sql: &str) -> AppResult<Vec<ResultRow>> {
        self.results
            .get(sql)
            .cloned()
            .ok_or_else(|| AppError::QueryExecution(format!("no scripted result for: {}", sql)))
    }
}

impl P21Connector for ScriptedP21 {
    fn connect(&self) -> AppResult<Box<dyn SqlSession>> {
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "DSN=Scripted;".to_string()
    }
}

pub fn metric(
    id: &str,
    group: &str,
    variable: &str,
    server: ServerName,
    axis_step: Option<&str>,
    test_sql: &str,
) -> MetricDefinition {
    MetricDefinition {
        id: id.to_string(),
        chart_group: group.to_string(),
        variable_name: variable.to_string(),
        server_name: server,
        table_name: String::new(),
        axis_step: axis_step.map(ToString::to_string),
        sql_expression_test: Some(test_sql.to_string()),
        sql_expression_production: None,
    }
}

pub fn scalar(value: f64) -> Vec<ResultRow> {
    vec![ResultRow::from_pairs([("value", Cell::Number(value))])]
}

/// Ten metrics: five AR aging buckets, two POR rows (one pointing at a missing
/// table), the two current-month web order rows, and one P21 row whose result
/// has no `value` column.
pub fn sample_catalog() -> Vec<MetricDefinition> {
    vec![
        metric("1", "AR Aging", "Current", ServerName::P21, None, "SELECT 100 AS value"),
        metric("2", "AR Aging", "1-30 Days", ServerName::P21, None, "SELECT 30 AS value"),
        metric("3", "AR Aging", "31-60 Days", ServerName::P21, None, "SELECT 60 AS value"),
        metric("4", "AR Aging", "61-90 Days", ServerName::P21, None, "SELECT 90 AS value"),
        metric("5", "AR Aging", "90+ Days", ServerName::P21, None, "SELECT 120 AS value"),
        metric(
            "6",
            "POR Overview",
            "Open Rentals",
            ServerName::Por,
            None,
            "SELECT Count(*) AS value FROM Transactions WHERE Status = 'Open'",
        ),
        metric(
            "7",
            "POR Overview",
            "Rental Value",
            ServerName::Por,
            None,
            "SELECT Count(*) AS value FROM WorkOrders",
        ),
        metric("8", "Web Orders", "web_order_count", ServerName::P21, Some("Current"), "SELECT 10 AS value"),
        metric("9", "Web Orders", "web_order_value", ServerName::P21, Some("Current"), "SELECT 500 AS value"),
        metric("10", "Accounts", "payable", ServerName::P21, Some("Current"), "SELECT COUNT(*) FROM dbo.apinv_hdr"),
    ]
}

pub fn sample_p21() -> ScriptedP21 {
    let mut results = HashMap::new();
    for (sql, value) in [
        ("SELECT 100 AS value", 100.0),
        ("SELECT 30 AS value", 30.0),
        ("SELECT 60 AS value", 60.0),
        ("SELECT 90 AS value", 90.0),
        ("SELECT 120 AS value", 120.0),
        ("SELECT 10 AS value", 10.0),
        ("SELECT 500 AS value", 500.0),
    ] {
        results.insert(sql.to_string(), scalar(value));
    }
    results.insert(
        "SELECT COUNT(*) FROM dbo.apinv_hdr".to_string(),
        vec![ResultRow::from_pairs([("count", Cell::Integer(5))])],
    );
    ScriptedP21::new(results)
}

const POR_SNAPSHOT: &str = r#"{
  "tables": {
    "Transactions": [
      {"ContractNo": 1001, "Status": "Open", "TotalValue": 250.0},
      {"ContractNo": 1002, "Status": "Open", "TotalValue": 125.5},
      {"ContractNo": 1003, "Status": "Closed", "TotalValue": 80.0}
    ]
  }
}"#;

/// Bootstraps an app on throwaway files: catalog, cache db and a POR snapshot.
pub fn sample_app(root: &Path) -> App {
    let catalog_path = root.join("metrics.json");
    std::fs::write(
        &catalog_path,
        serde_json::to_vec_pretty(&sample_catalog()).expect("catalog json"),
    )
    .expect("write catalog");
    let por_path = root.join("por.json");
    std::fs::write(&por_path, POR_SNAPSHOT).expect("write snapshot");

    let config = AppConfig {
        cache_db_path: root.join("dashboard.db"),
        catalog_path,
        log_dir: root.join("logs"),
        read_cache_ttl_ms: 60_000,
        por: PorSettings {
            file_path: Some(por_path),
            fallback_paths: vec![],
            ..PorSettings::default()
        },
        ..AppConfig::default()
    };
    let resolver = ConnectionResolver::new(
        Arc::new(sample_p21()),
        Arc::new(AccessFileOpener::new(config.por.clone())),
    );
    tallman_dashboard_lib::bootstrap_with_resolver(config, resolver).expect("bootstrap")
}
