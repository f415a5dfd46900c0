use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::CacheRow;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const WEB_ORDER_COUNT: &str = "web_order_count";
pub const WEB_ORDER_VALUE: &str = "web_order_value";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardEntry {
    pub id: String,
    pub chart_group: String,
    pub variable_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_step: Option<String>,
    /// Always finite; unset and no-data rows render as 0.
    pub value: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<&CacheRow> for DashboardEntry {
    fn from(row: &CacheRow) -> Self {
        Self {
            id: row.definition.id.clone(),
            chart_group: row.definition.chart_group.clone(),
            variable_name: row.definition.variable_name.clone(),
            axis_step: row.definition.axis_step.clone(),
            value: row.value.as_number(),
            last_updated: row.last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebOrderPoint {
    pub date: NaiveDate,
    pub orders: f64,
    pub revenue: f64,
}

/// One array per chart group plus the `webOrders` month series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub metrics: Vec<DashboardEntry>,
    pub accounts: Vec<DashboardEntry>,
    pub historical_data: Vec<DashboardEntry>,
    pub customer_metrics: Vec<DashboardEntry>,
    pub inventory: Vec<DashboardEntry>,
    pub por_overview: Vec<DashboardEntry>,
    pub site_distribution: Vec<DashboardEntry>,
    pub ar_aging: Vec<DashboardEntry>,
    pub daily_orders: Vec<DashboardEntry>,
    pub web_orders: Vec<WebOrderPoint>,
}

impl DashboardData {
    fn bucket_mut(&mut self, chart_group: &str) -> Option<&mut Vec<DashboardEntry>> {
        let key: String = chart_group
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .map(|ch| ch.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "keymetrics" | "metrics" => Some(&mut self.metrics),
            "accounts" => Some(&mut self.accounts),
            "historicaldata" => Some(&mut self.historical_data),
            "customermetrics" => Some(&mut self.customer_metrics),
            "inventory" => Some(&mut self.inventory),
            "poroverview" => Some(&mut self.por_overview),
            "sitedistribution" => Some(&mut self.site_distribution),
            "araging" => Some(&mut self.ar_aging),
            "dailyorders" => Some(&mut self.daily_orders),
            _ => None,
        }
    }
}

/// Groups rows by chart group, keeping cache order inside each group.
pub fn build_dashboard(rows: &[CacheRow], today: NaiveDate) -> DashboardData {
    let mut data = DashboardData::default();
    for row in rows {
        if is_web_order_row(row) {
            continue;
        }
        match data.bucket_mut(&row.definition.chart_group) {
            Some(bucket) => bucket.push(DashboardEntry::from(row)),
            None => {
                tracing::debug!(
                    metric_id = %row.definition.id,
                    chart_group = %row.definition.chart_group,
                    "row has no dashboard bucket"
                );
            }
        }
    }
    data.web_orders = pivot_web_orders(rows, today);
    data
}

fn is_web_order_row(row: &CacheRow) -> bool {
    let name = row.definition.variable_name.as_str();
    name.eq_ignore_ascii_case(WEB_ORDER_COUNT) || name.eq_ignore_ascii_case(WEB_ORDER_VALUE)
}

/// Pivots `web_order_count` / `web_order_value` rows into one point per month,
/// keyed by the first day of the month `axisStep` months before `today`.
pub fn pivot_web_orders(rows: &[CacheRow], today: NaiveDate) -> Vec<WebOrderPoint> {
    let mut points: BTreeMap<NaiveDate, WebOrderPoint> = BTreeMap::new();
    for row in rows.iter().filter(|row| is_web_order_row(row)) {
        let step = row.definition.axis_step.as_deref().unwrap_or_default();
        let Some(date) = parse_axis_step(step).and_then(|offset| month_start(today, offset)) else {
            tracing::debug!(metric_id = %row.definition.id, axis_step = %step, "unusable axis step");
            continue;
        };
        let point = points.entry(date).or_insert(WebOrderPoint {
            date,
            orders: 0.0,
            revenue: 0.0,
        });
        if row.definition.variable_name.eq_ignore_ascii_case(WEB_ORDER_COUNT) {
            point.orders = row.value.as_number();
        } else {
            point.revenue = row.value.as_number();
        }
    }
    points.into_values().collect()
}

/// `"Current"` is 0 months back, `"-n"` (or `"n"`) is n months back.
pub fn parse_axis_step(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("current") {
        return Some(0);
    }
    trimmed.strip_prefix('-').unwrap_or(trimmed).parse::<u32>().ok()
}

fn month_start(today: NaiveDate, months_back: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?.checked_sub_months(Months::new(months_back))
}

/// Memoizes the dashboard payload for `ttl`. The refresh endpoint invalidates it.
#[derive(Debug)]
pub struct DashboardCache {
    ttl: Duration,
    last: Mutex<Option<(Instant, Arc<DashboardData>)>>,
}

impl DashboardCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    pub fn load(&self, db: &Database) -> AppResult<Arc<DashboardData>> {
        let mut last = self
            .last
            .lock()
            .map_err(|_| AppError::Internal("dashboard cache poisoned".to_string()))?;
        if let Some((at, data)) = last.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(data.clone());
            }
        }
        let rows = db.read_all()?;
        let data = Arc::new(build_dashboard(&rows, Utc::now().date_naive()));
        *last = Some((Instant::now(), data.clone()));
        Ok(data)
    }

    pub fn invalidate(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{build_dashboard, parse_axis_step, pivot_web_orders, DashboardCache};
    use crate::db::{CacheUpdate, Database};
    use crate::models::{CacheRow, MetricDefinition, MetricValue, ServerName};
    use chrono::{NaiveDate, Utc};
    use std::time::Duration;

    fn row(id: &str, group: &str, variable: &str, axis_step: Option<&str>, value: MetricValue) -> CacheRow {
        CacheRow {
            position: 0,
            definition: MetricDefinition {
                id: id.to_string(),
                chart_group: group.to_string(),
                variable_name: variable.to_string(),
                server_name: ServerName::P21,
                table_name: String::new(),
                axis_step: axis_step.map(ToString::to_string),
                sql_expression_test: None,
                sql_expression_production: None,
            },
            value,
            last_updated: None,
            error: None,
            error_type: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 17).expect("date")
    }

    #[test]
    fn ar_aging_bucket_holds_exactly_its_rows_with_finite_values() {
        let rows = vec![
            row("1", "AR Aging", "Current", None, MetricValue::Value(100.0)),
            row("2", "AR Aging", "1-30 Days", None, MetricValue::NoData),
            row("3", "AR Aging", "31-60 Days", None, MetricValue::Unset),
            row("4", "AR Aging", "61-90 Days", None, MetricValue::Value(f64::NAN)),
            row("5", "AR Aging", "90+ Days", None, MetricValue::Value(5.5)),
            row("6", "Accounts", "payable", Some("Current"), MetricValue::Value(9.0)),
        ];
        let data = build_dashboard(&rows, today());
        assert_eq!(data.ar_aging.len(), 5);
        assert!(data.ar_aging.iter().all(|entry| entry.value.is_finite()));
        assert_eq!(
            data.ar_aging.iter().map(|entry| entry.value).collect::<Vec<_>>(),
            vec![100.0, 0.0, 0.0, 0.0, 5.5]
        );
        assert_eq!(data.accounts.len(), 1);

        let json = serde_json::to_value(&data).expect("json");
        assert!(json.get("arAging").is_some());
        assert!(json.get("historicalData").is_some());
    }

    #[test]
    fn web_orders_pivot_into_month_points() {
        let rows = vec![
            row("1", "Web Orders", "web_order_count", Some("Current"), MetricValue::Value(10.0)),
            row("2", "Web Orders", "web_order_value", Some("Current"), MetricValue::Value(500.0)),
            row("3", "Web Orders", "web_order_count", Some("-1"), MetricValue::Value(8.0)),
            row("4", "Web Orders", "web_order_value", Some("-2"), MetricValue::Value(300.0)),
            row("5", "Web Orders", "web_order_value", Some("someday"), MetricValue::Value(1.0)),
        ];
        let points = pivot_web_orders(&rows, today());
        let dates: Vec<String> = points.iter().map(|point| point.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-01-01", "2024-02-01", "2024-03-01"]);
        let current = &points[2];
        assert_eq!((current.orders, current.revenue), (10.0, 500.0));
        assert_eq!((points[1].orders, points[1].revenue), (8.0, 0.0));

        let data = build_dashboard(&rows, today());
        assert!(data.metrics.is_empty());
        assert_eq!(data.web_orders.len(), 3);
    }

    #[test]
    fn axis_steps_cross_year_boundaries() {
        assert_eq!(parse_axis_step("Current"), Some(0));
        assert_eq!(parse_axis_step(" -11 "), Some(11));
        assert_eq!(parse_axis_step("next"), None);
        let rows = vec![row("1", "Web Orders", "web_order_count", Some("-3"), MetricValue::Value(1.0))];
        let points = pivot_web_orders(&rows, today());
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2023, 12, 1).expect("date"));
    }

    #[test]
    fn cache_serves_stale_payload_until_invalidated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("dashboard.db")).expect("db");
        let definition = row("1", "Inventory", "in_stock", None, MetricValue::Unset).definition;
        db.sync_catalog(&[definition]).expect("sync");

        let cache = DashboardCache::new(Duration::from_secs(3600));
        assert_eq!(cache.load(&db).expect("load").inventory[0].value, 0.0);

        db.upsert_value(&CacheUpdate {
            id: "1".to_string(),
            value: Some(MetricValue::Value(42.0)),
            timestamp: Utc::now(),
            error: None,
        })
        .expect("upsert");
        assert_eq!(cache.load(&db).expect("load").inventory[0].value, 0.0);

        cache.invalidate();
        assert_eq!(cache.load(&db).expect("load").inventory[0].value, 42.0);
    }
}
