use crate::errors::{AppError, AppResult};
use crate::models::RefreshMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_POR_FALLBACKS: &[&str] = &[
    r"C:\POR\PORENT.mdb",
    r"\\ts03\POR\POR.MDB",
    "data/POR.mdb",
    "data/por.json",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct P21Settings {
    pub dsn: String,
    pub trusted_connection: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// DSN for test-mode SQL. Unset means test SQL is answered in-process.
    pub test_dsn: Option<String>,
}

impl Default for P21Settings {
    fn default() -> Self {
        Self {
            dsn: "P21Play".to_string(),
            trusted_connection: true,
            user: None,
            password: None,
            database: None,
            test_dsn: None,
        }
    }
}

impl P21Settings {
    pub fn connection_string(&self) -> String {
        let mut parts = vec![format!("DSN={}", self.dsn)];
        if let Some(database) = &self.database {
            parts.push(format!("Database={}", database));
        }
        if self.trusted_connection {
            parts.push("Trusted_Connection=Yes".to_string());
        } else {
            if let Some(user) = &self.user {
                parts.push(format!("UID={}", user));
            }
            if let Some(password) = &self.password {
                parts.push(format!("PWD={}", password));
            }
        }
        let mut joined = parts.join(";");
        joined.push(';');
        joined
    }

    /// Connection string with the password masked, for logs.
    pub fn describe(&self) -> String {
        if self.password.is_some() && !self.trusted_connection {
            self.connection_string()
                .split(';')
                .map(|part| {
                    if part.to_ascii_uppercase().starts_with("PWD=") {
                        "PWD=***"
                    } else {
                        part
                    }
                })
                .collect::<Vec<_>>()
                .join(";")
        } else {
            self.connection_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PorSettings {
    pub file_path: Option<PathBuf>,
    pub fallback_paths: Vec<PathBuf>,
    pub mdb_export_command: String,
    pub mdb_tables_command: String,
    /// POR file for test-mode SQL. Unset means the built-in snapshot.
    pub test_file_path: Option<PathBuf>,
}

impl Default for PorSettings {
    fn default() -> Self {
        Self {
            file_path: None,
            fallback_paths: DEFAULT_POR_FALLBACKS.iter().map(PathBuf::from).collect(),
            mdb_export_command: "mdb-export".to_string(),
            mdb_tables_command: "mdb-tables".to_string(),
            test_file_path: None,
        }
    }
}

impl PorSettings {
    /// Configured path first, then each fallback; the first existing file wins.
    pub fn resolve_path(&self) -> AppResult<PathBuf> {
        let candidates = self.candidates();
        if let Some(found) = candidates.iter().find(|candidate| candidate.is_file()) {
            return Ok(found.clone());
        }
        let tried = candidates
            .iter()
            .map(|candidate| candidate.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(AppError::FileNotFound(format!(
            "POR database not found (tried: {})",
            if tried.is_empty() { "<none>".to_string() } else { tried }
        )))
    }

    pub fn candidates(&self) -> Vec<PathBuf> {
        self.file_path
            .iter()
            .chain(self.fallback_paths.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub cache_db_path: PathBuf,
    pub catalog_path: PathBuf,
    pub log_dir: PathBuf,
    pub bind_addr: String,
    pub tick_interval_ms: u64,
    pub initial_mode: RefreshMode,
    pub read_cache_ttl_ms: u64,
    pub autostart_driver: bool,
    /// Run one full refresh pass in the background when serving starts.
    pub warm_up_on_start: bool,
    pub p21: P21Settings,
    pub por: PorSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_db_path: PathBuf::from("data/dashboard.db"),
            catalog_path: PathBuf::from("data/metrics.json"),
            log_dir: PathBuf::from("logs"),
            bind_addr: "127.0.0.1:3200".to_string(),
            tick_interval_ms: 5_000,
            initial_mode: RefreshMode::Test,
            read_cache_ttl_ms: 5_000,
            autostart_driver: false,
            warm_up_on_start: false,
            p21: P21Settings::default(),
            por: PorSettings::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional YAML file, then process environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_yaml_file(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path).map_err(|error| {
            AppError::Config(format!("cannot read {}: {}", path.to_string_lossy(), error))
        })?;
        serde_yaml::from_str(&raw).map_err(AppError::from)
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("TALLMAN_CACHE_DB") {
            self.cache_db_path = PathBuf::from(value);
        }
        if let Some(value) = get("TALLMAN_CATALOG") {
            self.catalog_path = PathBuf::from(value);
        }
        if let Some(value) = get("TALLMAN_LOG_DIR") {
            self.log_dir = PathBuf::from(value);
        }
        if let Some(value) = get("TALLMAN_BIND") {
            self.bind_addr = value;
        }
        if let Some(value) = get("TALLMAN_TICK_MS") {
            self.tick_interval_ms = parse_number("TALLMAN_TICK_MS", &value)?;
        }
        if let Some(value) = get("TALLMAN_READ_CACHE_MS") {
            self.read_cache_ttl_ms = parse_number("TALLMAN_READ_CACHE_MS", &value)?;
        }
        if let Some(value) = get("TALLMAN_MODE") {
            self.initial_mode = RefreshMode::parse(&value)
                .ok_or_else(|| AppError::Config(format!("TALLMAN_MODE must be test or production, got {}", value)))?;
        }
        if let Some(value) = get("TALLMAN_AUTOSTART") {
            self.autostart_driver = parse_flag(&value);
        }
        if let Some(value) = get("TALLMAN_WARM_UP") {
            self.warm_up_on_start = parse_flag(&value);
        }
        if let Some(value) = get("P21_DSN") {
            self.p21.dsn = value;
        }
        if let Some(value) = get("P21_DATABASE") {
            self.p21.database = Some(value);
        }
        if let Some(value) = get("P21_TEST_DSN") {
            self.p21.test_dsn = Some(value);
        }
        if let Some(value) = get("P21_TRUSTED_CONNECTION") {
            self.p21.trusted_connection = parse_flag(&value);
        }
        if let Some(value) = get("P21_USER") {
            self.p21.user = Some(value);
        }
        if let Some(value) = get("P21_PASSWORD") {
            self.p21.password = Some(value);
        }
        if let Some(value) = get("POR_FILE_PATH") {
            self.por.file_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("POR_TEST_FILE_PATH") {
            self.por.test_file_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("POR_MDB_EXPORT") {
            self.por.mdb_export_command = value;
        }
        if let Some(value) = get("POR_MDB_TABLES") {
            self.por.mdb_tables_command = value;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(AppError::Config("tick interval must be greater than zero".to_string()));
        }
        if !self.p21.trusted_connection && self.p21.user.is_none() {
            return Err(AppError::Config(
                "P21 credentials required when trusted connection is disabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number(key: &str, raw: &str) -> AppResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| AppError::Config(format!("{} must be a whole number, got {}", key, raw)))
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, P21Settings, PorSettings};
    use crate::models::RefreshMode;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars = env(&[
            ("TALLMAN_TICK_MS", "250"),
            ("TALLMAN_MODE", "production"),
            ("P21_DSN", "P21Live"),
            ("POR_FILE_PATH", "/srv/por/POR.mdb"),
        ]);
        let config = AppConfig::default()
            .with_env_overrides(|key| vars.get(key).cloned())
            .expect("config");
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.initial_mode, RefreshMode::Production);
        assert_eq!(config.p21.dsn, "P21Live");
        assert_eq!(config.por.candidates()[0], PathBuf::from("/srv/por/POR.mdb"));
        assert_eq!(config.p21.test_dsn, None);

        let vars = env(&[("P21_TEST_DSN", "P21Play"), ("POR_TEST_FILE_PATH", "/srv/por/test.json")]);
        let config = AppConfig::default()
            .with_env_overrides(|key| vars.get(key).cloned())
            .expect("config");
        assert_eq!(config.p21.test_dsn.as_deref(), Some("P21Play"));
        assert_eq!(config.por.test_file_path, Some(PathBuf::from("/srv/por/test.json")));
    }

    #[test]
    fn rejects_bad_mode_and_zero_interval() {
        let vars = env(&[("TALLMAN_MODE", "staging")]);
        assert!(AppConfig::default()
            .with_env_overrides(|key| vars.get(key).cloned())
            .is_err());

        let vars = env(&[("TALLMAN_TICK_MS", "0")]);
        assert!(AppConfig::default()
            .with_env_overrides(|key| vars.get(key).cloned())
            .is_err());
    }

    #[test]
    fn yaml_file_is_read_before_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dashboard.yaml");
        std::fs::write(&path, "tickIntervalMs: 900\np21:\n  dsn: FromFile\n").expect("write yaml");
        let config = AppConfig::from_yaml_file(&path)
            .expect("yaml")
            .with_env_overrides(|_| None)
            .expect("config");
        assert_eq!(config.tick_interval_ms, 900);
        assert_eq!(config.p21.dsn, "FromFile");
        assert!(config.p21.trusted_connection);
    }

    #[test]
    fn connection_string_masks_password_in_description() {
        let settings = P21Settings {
            dsn: "P21Live".to_string(),
            trusted_connection: false,
            user: Some("reporter".to_string()),
            password: Some("hunter2".to_string()),
            database: None,
            test_dsn: None,
        };
        assert_eq!(settings.connection_string(), "DSN=P21Live;UID=reporter;PWD=hunter2;");
        assert!(!settings.describe().contains("hunter2"));
    }

    #[test]
    fn por_path_falls_back_to_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let present = dir.path().join("por.json");
        std::fs::write(&present, "{}").expect("write");
        let settings = PorSettings {
            file_path: Some(dir.path().join("missing.mdb")),
            fallback_paths: vec![dir.path().join("also-missing.mdb"), present.clone()],
            ..PorSettings::default()
        };
        assert_eq!(settings.resolve_path().expect("resolve"), present);

        let none = PorSettings {
            file_path: Some(dir.path().join("missing.mdb")),
            fallback_paths: vec![],
            ..PorSettings::default()
        };
        let error = none.resolve_path().expect_err("missing");
        assert_eq!(error.error_type(), "file_not_found");
    }
}
