use super::{PorOpener, TableSource};
use crate::access_sql::Table;
use crate::config::PorSettings;
use crate::errors::{AppError, AppResult};
use crate::models::{Cell, ResultRow};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Opens the POR database file. `.mdb` and `.accdb` go through the mdbtools
/// command line, `.json` snapshots are read directly. Tables load whole, once
/// per query.
#[derive(Debug, Clone)]
pub struct AccessFileOpener {
    settings: PorSettings,
}

impl AccessFileOpener {
    pub fn new(settings: PorSettings) -> Self {
        Self { settings }
    }
}

impl PorOpener for AccessFileOpener {
    fn open(&self) -> AppResult<Box<dyn TableSource>> {
        let path = self.settings.resolve_path()?;
        let extension = path
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        tracing::debug!(path = %path.to_string_lossy(), "resolved POR database file");

        match extension.as_str() {
            "json" => Ok(Box::new(JsonSnapshotSource::new(path))),
            "mdb" | "accdb" => Ok(Box::new(MdbToolsSource {
                path,
                export_command: self.settings.mdb_export_command.clone(),
                tables_command: self.settings.mdb_tables_command.clone(),
            })),
            other => Err(AppError::Config(format!(
                "unsupported POR file type '{}' for {}",
                other,
                path.to_string_lossy()
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonSnapshotSource {
    path: PathBuf,
}

impl JsonSnapshotSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TableSource for JsonSnapshotSource {
    fn load_table(&self, name: &str) -> AppResult<Table> {
        let bytes = fs::read(&self.path).map_err(|error| file_error(&self.path, error))?;
        snapshot_table(&bytes, name, &self.path.to_string_lossy())
    }
}

/// Pulls one table out of a `{"tables": {...}}` snapshot document.
pub(crate) fn snapshot_table(bytes: &[u8], name: &str, origin: &str) -> AppResult<Table> {
    let document: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|error| AppError::QueryExecution(format!("invalid POR snapshot {}: {}", origin, error)))?;
    let tables = document
        .get("tables")
        .and_then(|tables| tables.as_object())
        .ok_or_else(|| {
            AppError::QueryExecution(format!("POR snapshot {} has no \"tables\" object", origin))
        })?;

    let Some((table_name, raw_rows)) = tables
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
    else {
        return Err(AppError::TableNotFound(format!("table {} not found in {}", name, origin)));
    };

    let rows = raw_rows
        .as_array()
        .ok_or_else(|| AppError::QueryExecution(format!("table {} is not an array of rows", table_name)))?
        .iter()
        .map(|raw| match raw.as_object() {
            Some(object) => Ok(ResultRow::from_pairs(
                object
                    .iter()
                    .map(|(column, value)| (column.clone(), Cell::from_json(value))),
            )),
            None => Err(AppError::QueryExecution(format!(
                "table {} contains a non-object row",
                table_name
            ))),
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Table::from_rows(table_name.clone(), rows))
}

#[derive(Debug, Clone)]
pub struct MdbToolsSource {
    path: PathBuf,
    export_command: String,
    tables_command: String,
}

impl MdbToolsSource {
    fn table_names(&self) -> AppResult<Vec<String>> {
        let output = Command::new(&self.tables_command)
            .arg("-1")
            .arg(&self.path)
            .output()
            .map_err(|error| AppError::Connection(format!("cannot run {}: {}", self.tables_command, error)))?;
        if !output.status.success() {
            return Err(AppError::QueryExecution(format!(
                "{} failed: {}",
                self.tables_command,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }
}

impl TableSource for MdbToolsSource {
    fn load_table(&self, name: &str) -> AppResult<Table> {
        let table_name = self
            .table_names()?
            .into_iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                AppError::TableNotFound(format!(
                    "table {} not found in {}",
                    name,
                    self.path.to_string_lossy()
                ))
            })?;

        let output = Command::new(&self.export_command)
            .arg("-D")
            .arg("%Y-%m-%d %H:%M:%S")
            .arg(&self.path)
            .arg(&table_name)
            .output()
            .map_err(|error| AppError::Connection(format!("cannot run {}: {}", self.export_command, error)))?;
        if !output.status.success() {
            return Err(AppError::QueryExecution(format!(
                "{} failed for {}: {}",
                self.export_command,
                table_name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_csv_table(&table_name, &output.stdout)
    }
}

/// Parses CSV export output (header row first) into a table.
pub fn parse_csv_table(name: &str, bytes: &[u8]) -> AppResult<Table> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let columns: Vec<String> = reader.headers()?.iter().map(ToString::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(ResultRow::from_pairs(
            columns
                .iter()
                .zip(record.iter())
                .map(|(column, field)| (column.clone(), Cell::infer(field))),
        ));
    }
    Ok(Table::new(name, columns, rows))
}

fn file_error(path: &Path, error: std::io::Error) -> AppError {
    if error.kind() == std::io::ErrorKind::NotFound {
        AppError::FileNotFound(path.to_string_lossy().to_string())
    } else {
        AppError::Io(format!("{}: {}", path.to_string_lossy(), error))
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_csv_table, AccessFileOpener, JsonSnapshotSource};
    use crate::adapters::{PorOpener, TableSource};
    use crate::config::PorSettings;
    use crate::models::Cell;

    #[test]
    fn csv_export_is_typed_per_field() {
        let table = parse_csv_table(
            "Transactions",
            b"ContractNo,Total,Closed\n1001,12.50,\n1002,8,2024-01-02 00:00:00\n",
        )
        .expect("csv");
        assert_eq!(table.columns, vec!["ContractNo", "Total", "Closed"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("Total"), Some(&Cell::Number(12.5)));
        assert_eq!(table.rows[0].get("Closed"), Some(&Cell::Null));
    }

    #[test]
    fn json_snapshot_lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("por.json");
        std::fs::write(
            &path,
            r#"{"tables": {"Transactions": [{"ContractNo": 1, "Status": "Open"}]}}"#,
        )
        .expect("write");
        let source = JsonSnapshotSource::new(path);
        let table = source.load_table("transactions").expect("table");
        assert_eq!(table.name, "Transactions");
        assert_eq!(table.columns, vec!["ContractNo", "Status"]);

        let error = source.load_table("Customers").expect_err("missing");
        assert_eq!(error.error_type(), "table_not_found");
    }

    #[test]
    fn missing_file_surfaces_file_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opener = AccessFileOpener::new(PorSettings {
            file_path: Some(dir.path().join("POR.mdb")),
            fallback_paths: vec![],
            ..PorSettings::default()
        });
        let error = match opener.open() {
            Ok(_) => panic!("expected missing file"),
            Err(error) => error,
        };
        assert_eq!(error.error_type(), "file_not_found");
    }
}
