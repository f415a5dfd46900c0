use crate::errors::{AppError, AppResult};
use crate::models::{CacheRow, MetricDefinition, MetricValue, ServerName};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const ROW_COLUMNS: &str = "id, position, chart_group, variable_name, server_name, table_name, axis_step,
     sql_expression_test, sql_expression_production, value, value_state, last_updated, error, error_type";

/// One per-row cache write. `value: None` keeps whatever value the row already holds.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUpdate {
    pub id: String,
    pub value: Option<MetricValue>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<CacheError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError {
    pub message: String,
    pub error_type: String,
}

impl CacheError {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            message: error.to_string(),
            error_type: error.error_type().to_string(),
        }
    }
}

/// The local SQLite cache (`chart_data`). Single writer, any number of readers.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Rebuilds the definitional columns from the catalog. Values of surviving
    /// rows are kept; rows whose id left the catalog are removed.
    pub fn sync_catalog(&self, definitions: &[MetricDefinition]) -> AppResult<usize> {
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;
        for (position, definition) in definitions.iter().enumerate() {
            upsert_definition_row(&tx, position as i64, definition)?;
        }

        let keep: HashSet<&str> = definitions.iter().map(|definition| definition.id.as_str()).collect();
        let existing: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM chart_data")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };
        let mut removed = 0usize;
        for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
            removed += tx.execute("DELETE FROM chart_data WHERE id = ?1", [id])?;
        }
        tx.commit()?;

        if removed > 0 {
            tracing::info!(removed, "dropped cache rows no longer present in the catalog");
        }
        Ok(definitions.len())
    }

    /// Writes an edited definition, keeping its position and value.
    pub fn save_definition(&self, definition: &MetricDefinition) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let position: Option<i64> = conn
            .query_row(
                "SELECT position FROM chart_data WHERE id = ?1",
                [definition.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let position = match position {
            Some(position) => position,
            None => conn.query_row("SELECT COALESCE(MAX(position), -1) + 1 FROM chart_data", [], |row| {
                row.get(0)
            })?,
        };
        upsert_definition_row(&conn, position, definition)?;
        Ok(())
    }

    pub fn upsert_value(&self, update: &CacheUpdate) -> AppResult<bool> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let (error, error_type) = match &update.error {
            Some(error) => (Some(error.message.as_str()), Some(error.error_type.as_str())),
            None => (None, None),
        };
        let changed = match update.value {
            Some(value) => conn.execute(
                "UPDATE chart_data SET value = ?1, value_state = ?2, last_updated = ?3, error = ?4, error_type = ?5
                 WHERE id = ?6",
                params![
                    value.to_stored_text(),
                    value.state_str(),
                    update.timestamp.to_rfc3339(),
                    error,
                    error_type,
                    update.id,
                ],
            )?,
            None => conn.execute(
                "UPDATE chart_data SET last_updated = ?1, error = ?2, error_type = ?3 WHERE id = ?4",
                params![update.timestamp.to_rfc3339(), error, error_type, update.id],
            )?,
        };
        Ok(changed > 0)
    }

    /// Sets every row back to `Unset` and clears errors.
    pub fn reset_values(&self) -> AppResult<usize> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let changed = conn.execute(
            "UPDATE chart_data SET value = NULL, value_state = 'unset', error = NULL, error_type = NULL",
            [],
        )?;
        Ok(changed)
    }

    pub fn read_all(&self) -> AppResult<Vec<CacheRow>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let query = format!("SELECT {} FROM chart_data ORDER BY position ASC, id ASC", ROW_COLUMNS);
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map([], parse_cache_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn get_row(&self, id: &str) -> AppResult<Option<CacheRow>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let query = format!("SELECT {} FROM chart_data WHERE id = ?1", ROW_COLUMNS);
        conn.query_row(&query, [id], parse_cache_row)
            .optional()
            .map_err(AppError::from)
    }

    pub fn list_definitions(&self) -> AppResult<Vec<MetricDefinition>> {
        Ok(self
            .read_all()?
            .into_iter()
            .map(|row| row.definition)
            .collect())
    }
}

fn upsert_definition_row(conn: &Connection, position: i64, definition: &MetricDefinition) -> AppResult<()> {
    conn.execute(
        "INSERT INTO chart_data (
           id, position, chart_group, variable_name, server_name, table_name, axis_step,
           sql_expression_test, sql_expression_production
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
           position = excluded.position,
           chart_group = excluded.chart_group,
           variable_name = excluded.variable_name,
           server_name = excluded.server_name,
           table_name = excluded.table_name,
           axis_step = excluded.axis_step,
           sql_expression_test = excluded.sql_expression_test,
           sql_expression_production = excluded.sql_expression_production",
        params![
            definition.id,
            position,
            definition.chart_group,
            definition.variable_name,
            definition.server_name.as_str(),
            definition.table_name,
            definition.axis_step,
            definition.sql_expression_test,
            definition.sql_expression_production,
        ],
    )?;
    Ok(())
}

fn parse_cache_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRow> {
    let value_text: Option<String> = row.get(9)?;
    let value_state: String = row.get(10)?;
    Ok(CacheRow {
        position: row.get(1)?,
        definition: MetricDefinition {
            id: row.get(0)?,
            chart_group: row.get(2)?,
            variable_name: row.get(3)?,
            server_name: ServerName::from(row.get::<_, String>(4)?),
            table_name: row.get(5)?,
            axis_step: row.get(6)?,
            sql_expression_test: row.get(7)?,
            sql_expression_production: row.get(8)?,
        },
        value: MetricValue::from_stored(&value_state, value_text.as_deref()),
        last_updated: row
            .get::<_, Option<String>>(11)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        error: row.get(12)?,
        error_type: row.get(13)?,
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(error))
        })
}

#[cfg(test)]
mod tests {
    use super::{CacheError, CacheUpdate, Database};
    use crate::models::{MetricDefinition, MetricValue, ServerName};
    use chrono::Utc;

    fn definition(id: &str, group: &str) -> MetricDefinition {
        MetricDefinition {
            id: id.to_string(),
            chart_group: group.to_string(),
            variable_name: format!("var-{}", id),
            server_name: ServerName::P21,
            table_name: "dbo.oe_hdr".to_string(),
            axis_step: None,
            sql_expression_test: Some("SELECT 1 AS value".to_string()),
            sql_expression_production: None,
        }
    }

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("cache").join("dashboard.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn sync_preserves_values_and_drops_removed_rows() {
        let (_dir, db) = open();
        db.sync_catalog(&[definition("1", "AR Aging"), definition("2", "Accounts")])
            .expect("sync");
        db.upsert_value(&CacheUpdate {
            id: "1".to_string(),
            value: Some(MetricValue::Value(42.0)),
            timestamp: Utc::now(),
            error: None,
        })
        .expect("upsert");

        let mut edited = definition("1", "AR Aging");
        edited.variable_name = "Current".to_string();
        db.sync_catalog(&[edited]).expect("resync");

        let rows = db.read_all().expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].definition.variable_name, "Current");
        assert_eq!(rows[0].value, MetricValue::Value(42.0));
    }

    #[test]
    fn failure_without_value_keeps_previous_value() {
        let (_dir, db) = open();
        db.sync_catalog(&[definition("1", "AR Aging")]).expect("sync");
        db.upsert_value(&CacheUpdate {
            id: "1".to_string(),
            value: Some(MetricValue::Value(7.0)),
            timestamp: Utc::now(),
            error: None,
        })
        .expect("upsert");
        db.upsert_value(&CacheUpdate {
            id: "1".to_string(),
            value: None,
            timestamp: Utc::now(),
            error: Some(CacheError {
                message: "CONNECTION_FAILED: timeout".to_string(),
                error_type: "connection".to_string(),
            }),
        })
        .expect("upsert failure");

        let row = db.get_row("1").expect("get").expect("row");
        assert_eq!(row.value, MetricValue::Value(7.0));
        assert_eq!(row.error_type.as_deref(), Some("connection"));
        assert!(row.last_updated.is_some());
    }

    #[test]
    fn reset_clears_values_and_errors() {
        let (_dir, db) = open();
        db.sync_catalog(&[definition("1", "AR Aging"), definition("2", "AR Aging")])
            .expect("sync");
        db.upsert_value(&CacheUpdate {
            id: "2".to_string(),
            value: Some(MetricValue::NoData),
            timestamp: Utc::now(),
            error: Some(CacheError {
                message: "QUERY_FAILED: bad".to_string(),
                error_type: "query_execution".to_string(),
            }),
        })
        .expect("upsert");

        assert_eq!(db.reset_values().expect("reset"), 2);
        for row in db.read_all().expect("read") {
            assert_eq!(row.value, MetricValue::Unset);
            assert!(row.error.is_none());
        }
    }

    #[test]
    fn save_definition_appends_new_rows_at_the_end() {
        let (_dir, db) = open();
        db.sync_catalog(&[definition("1", "AR Aging")]).expect("sync");
        db.save_definition(&definition("9", "Inventory")).expect("save");
        let rows = db.read_all().expect("read");
        assert_eq!(rows.iter().map(|row| row.position).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(rows[1].definition.chart_group, "Inventory");
    }

    #[test]
    fn upsert_for_unknown_id_reports_no_change() {
        let (_dir, db) = open();
        let changed = db
            .upsert_value(&CacheUpdate {
                id: "missing".to_string(),
                value: Some(MetricValue::Value(1.0)),
                timestamp: Utc::now(),
                error: None,
            })
            .expect("upsert");
        assert!(!changed);
    }
}
