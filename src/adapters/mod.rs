pub mod p21;
pub mod por;
pub mod synthetic;

use crate::access_sql::{self, Table};
use crate::config::{AppConfig, P21Settings, PorSettings};
use crate::errors::AppResult;
use crate::models::{RefreshMode, ResultRow, ServerName};
use std::sync::Arc;

/// An open session against a SQL backend. Sessions live for one tick.
pub trait SqlSession {
    fn query(&mut self, sql: &str) -> AppResult<Vec<ResultRow>>;
}

pub trait P21Connector: Send + Sync {
    fn connect(&self) -> AppResult<Box<dyn SqlSession>>;
    fn describe(&self) -> String;
}

/// Reads whole tables out of a POR database file.
pub trait TableSource {
    fn load_table(&self, name: &str) -> AppResult<Table>;
}

pub trait PorOpener: Send + Sync {
    fn open(&self) -> AppResult<Box<dyn TableSource>>;
}

pub enum ConnectionHandle {
    P21(Box<dyn SqlSession>),
    Por(Box<dyn TableSource>),
    /// Unknown server name; executing it is a no-op.
    Skip,
}

impl ConnectionHandle {
    /// Runs `sql` on the handle. `None` means the handle was a skip.
    pub fn execute(&mut self, sql: &str) -> AppResult<Option<Vec<ResultRow>>> {
        match self {
            Self::P21(session) => session.query(sql).map(Some),
            Self::Por(source) => {
                access_sql::execute(sql, |table| source.load_table(table)).map(Some)
            }
            Self::Skip => Ok(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::P21(_) => "p21",
            Self::Por(_) => "por",
            Self::Skip => "skip",
        }
    }
}

#[derive(Clone)]
struct Backends {
    p21: Arc<dyn P21Connector>,
    por: Arc<dyn PorOpener>,
}

/// Picks the backend for a row. Test and production each have their own
/// backends, so test SQL never reaches the live P21 server or POR file unless
/// configured to.
#[derive(Clone)]
pub struct ConnectionResolver {
    test: Backends,
    production: Backends,
}

impl ConnectionResolver {
    /// Same backends for both modes.
    pub fn new(p21: Arc<dyn P21Connector>, por: Arc<dyn PorOpener>) -> Self {
        let backends = Backends { p21, por };
        Self {
            test: backends.clone(),
            production: backends,
        }
    }

    pub fn with_test_backends(mut self, p21: Arc<dyn P21Connector>, por: Arc<dyn PorOpener>) -> Self {
        self.test = Backends { p21, por };
        self
    }

    /// Production uses the configured DSN and POR file. Test mode uses
    /// `p21.testDsn` / `por.testFilePath` when set, else the in-process
    /// constant-select source and the built-in POR snapshot.
    pub fn from_config(config: &AppConfig) -> Self {
        let test_p21: Arc<dyn P21Connector> = match &config.p21.test_dsn {
            Some(dsn) => Arc::new(p21::OdbcConnector::new(P21Settings {
                dsn: dsn.clone(),
                ..config.p21.clone()
            })),
            None => Arc::new(synthetic::ConstantSelectConnector),
        };
        let test_por: Arc<dyn PorOpener> = match &config.por.test_file_path {
            Some(path) => Arc::new(por::AccessFileOpener::new(PorSettings {
                file_path: Some(path.clone()),
                fallback_paths: Vec::new(),
                ..config.por.clone()
            })),
            None => Arc::new(synthetic::EmbeddedSnapshotOpener),
        };
        Self::new(
            Arc::new(p21::OdbcConnector::new(config.p21.clone())),
            Arc::new(por::AccessFileOpener::new(config.por.clone())),
        )
        .with_test_backends(test_p21, test_por)
    }

    pub fn resolve(&self, server: &ServerName, mode: RefreshMode) -> AppResult<ConnectionHandle> {
        let backends = match mode {
            RefreshMode::Test => &self.test,
            RefreshMode::Production => &self.production,
        };
        match server {
            ServerName::P21 => {
                tracing::debug!(target_dsn = %backends.p21.describe(), mode = %mode, "opening P21 session");
                backends.p21.connect().map(ConnectionHandle::P21)
            }
            ServerName::Por => backends.por.open().map(ConnectionHandle::Por),
            ServerName::Other(name) => {
                tracing::debug!(server = %name, "unknown server name; skipping");
                Ok(ConnectionHandle::Skip)
            }
        }
    }
}
