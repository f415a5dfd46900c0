mod common;

use chrono::{Datelike, NaiveDate, Utc};
use tallman_dashboard_lib::config::AppConfig;
use tallman_dashboard_lib::dashboard::build_dashboard;
use tallman_dashboard_lib::models::{MetricValue, RefreshMode};

#[test]
fn full_pass_isolates_the_broken_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = common::sample_app(dir.path());
    let definitions = app.controller.catalog().list_metrics().expect("list");

    let summary = app.controller.pipeline().refresh_all(&definitions, RefreshMode::Test);
    assert_eq!(summary.updated, 9);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);

    let rows = app.controller.pipeline().db().read_all().expect("read");
    for row in &rows {
        assert!(row.last_updated.is_some(), "row {} not refreshed", row.definition.id);
        if row.definition.id == "7" {
            assert_eq!(row.error_type.as_deref(), Some("table_not_found"));
            assert_eq!(row.value, MetricValue::NoData);
        } else {
            assert!(row.error.is_none(), "row {} has error {:?}", row.definition.id, row.error);
        }
    }

    let open_rentals = rows.iter().find(|row| row.definition.id == "6").expect("row 6");
    assert_eq!(open_rentals.value, MetricValue::Value(2.0));
    let payable = rows.iter().find(|row| row.definition.id == "10").expect("row 10");
    assert_eq!(payable.value, MetricValue::Value(5.0));
}

#[test]
fn refreshed_cache_groups_into_dashboard_payload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = common::sample_app(dir.path());
    let definitions = app.controller.catalog().list_metrics().expect("list");
    app.controller.pipeline().refresh_all(&definitions, RefreshMode::Test);

    let today = Utc::now().date_naive();
    let rows = app.controller.pipeline().db().read_all().expect("read");
    let data = build_dashboard(&rows, today);

    assert_eq!(
        data.ar_aging.iter().map(|entry| entry.value).collect::<Vec<_>>(),
        vec![100.0, 30.0, 60.0, 90.0, 120.0]
    );
    assert_eq!(data.por_overview.len(), 2);
    assert_eq!(data.accounts.len(), 1);
    assert_eq!(data.web_orders.len(), 1);
    let point = &data.web_orders[0];
    assert_eq!(
        point.date,
        NaiveDate::from_ymd_opt(today.year(), today.month(), 1).expect("month start")
    );
    assert_eq!((point.orders, point.revenue), (10.0, 500.0));
}

#[tokio::test]
async fn ticks_cover_the_catalog_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = common::sample_app(dir.path());
    let count = app.controller.catalog().len();

    let mut visited = Vec::new();
    for _ in 0..count {
        let report = app.controller.tick_once().await.expect("tick").expect("report");
        visited.push(report.metric_id);
    }
    let expected: Vec<String> = (1..=count).map(|id| id.to_string()).collect();
    assert_eq!(visited, expected);

    let rows = app.controller.pipeline().db().read_all().expect("read");
    let stamps: Vec<_> = rows
        .iter()
        .map(|row| row.last_updated.expect("refreshed"))
        .collect();
    assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));

    // wraps back to the first metric
    let report = app.controller.tick_once().await.expect("tick").expect("report");
    assert_eq!(report.metric_id, "1");
}

#[tokio::test]
async fn production_switch_clears_test_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = common::sample_app(dir.path());
    let definitions = app.controller.catalog().list_metrics().expect("list");
    app.controller.pipeline().refresh_all(&definitions, RefreshMode::Test);

    app.controller.set_mode(RefreshMode::Production).await.expect("mode");
    let rows = app.controller.pipeline().db().read_all().expect("read");
    assert!(rows.iter().all(|row| row.value == MetricValue::Unset && row.error.is_none()));

    // no row has production SQL, so ticks skip and nothing comes back
    for _ in 0..definitions.len() {
        app.controller.tick_once().await.expect("tick");
    }
    app.controller.set_mode(RefreshMode::Test).await.expect("mode");
    let rows = app.controller.pipeline().db().read_all().expect("read");
    assert!(rows.iter().all(|row| row.value.as_number() == 0.0));
}

#[test]
fn restart_rebuilds_projection_from_catalog_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = common::sample_app(dir.path());
    let definitions = app.controller.catalog().list_metrics().expect("list");
    app.controller.pipeline().refresh_all(&definitions, RefreshMode::Test);
    drop(app);

    // a second bootstrap over the same files keeps values of surviving rows
    let reopened = common::sample_app(dir.path());
    let row = reopened
        .controller
        .pipeline()
        .db()
        .get_row("1")
        .expect("get")
        .expect("row");
    assert_eq!(row.value, MetricValue::Value(100.0));
    assert_eq!(reopened.controller.catalog().len(), 10);
}

#[test]
fn built_in_catalog_refreshes_in_test_mode_without_live_backends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = AppConfig {
        cache_db_path: dir.path().join("dashboard.db"),
        catalog_path: dir.path().join("metrics.json"),
        log_dir: dir.path().join("logs"),
        ..AppConfig::default()
    };
    let app = tallman_dashboard_lib::bootstrap(config).expect("bootstrap");
    let definitions = app.controller.catalog().list_metrics().expect("list");
    assert_eq!(definitions.len(), 65);

    let summary = app.controller.pipeline().refresh_all(&definitions, RefreshMode::Test);
    assert_eq!((summary.updated, summary.failed, summary.skipped), (65, 0, 0));

    let rows = app.controller.pipeline().db().read_all().expect("read");
    let first = rows.iter().find(|row| row.definition.id == "1").expect("row 1");
    assert_eq!(first.value, MetricValue::Value(1840.0));
    let rental_value = rows.iter().find(|row| row.definition.id == "38").expect("row 38");
    assert!(matches!(rental_value.value, MetricValue::Value(value) if value > 0.0));
    assert!(rows.iter().all(|row| row.error.is_none()));
}

#[tokio::test]
async fn one_shot_production_pass_starts_from_a_reset_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = common::sample_app(dir.path());
    app.controller.refresh_all().await.expect("test pass");
    let rows = app.controller.pipeline().db().read_all().expect("read");
    assert!(rows.iter().any(|row| matches!(row.value, MetricValue::Value(_))));

    // what `refresh-once --mode production` does
    app.controller.set_mode(RefreshMode::Production).await.expect("mode");
    let summary = app.controller.refresh_all().await.expect("production pass");
    assert_eq!(summary.skipped, 10);

    let rows = app.controller.pipeline().db().read_all().expect("read");
    assert!(rows.iter().all(|row| row.value == MetricValue::Unset));
}
