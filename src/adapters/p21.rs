use super::{P21Connector, SqlSession};
use crate::config::P21Settings;
use crate::errors::AppResult;

/// P21 (SQL Server) over ODBC. SQL text is passed to the driver verbatim.
#[derive(Debug, Clone)]
pub struct OdbcConnector {
    settings: P21Settings,
}

impl OdbcConnector {
    pub fn new(settings: P21Settings) -> Self {
        Self { settings }
    }
}

impl P21Connector for OdbcConnector {
    fn connect(&self) -> AppResult<Box<dyn SqlSession>> {
        odbc::connect(&self.settings.connection_string())
    }

    fn describe(&self) -> String {
        self.settings.describe()
    }
}

#[cfg(feature = "odbc")]
mod odbc {
    use crate::adapters::SqlSession;
    use crate::errors::{AppError, AppResult};
    use crate::models::{Cell, ResultRow};
    use odbc_api::buffers::TextRowSet;
    use odbc_api::{Connection, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
    use once_cell::sync::OnceCell;

    const BATCH_SIZE: usize = 256;
    const MAX_TEXT_BYTES: usize = 4096;

    static ENVIRONMENT: OnceCell<Environment> = OnceCell::new();

    fn environment() -> AppResult<&'static Environment> {
        ENVIRONMENT.get_or_try_init(|| {
            Environment::new().map_err(|error| AppError::Connection(format!("ODBC environment: {}", error)))
        })
    }

    pub fn connect(connection_string: &str) -> AppResult<Box<dyn SqlSession>> {
        let connection = environment()?
            .connect_with_connection_string(connection_string, ConnectionOptions::default())
            .map_err(|error| AppError::Connection(error.to_string()))?;
        Ok(Box::new(OdbcSession { connection }))
    }

    struct OdbcSession {
        connection: Connection<'static>,
    }

    impl SqlSession for OdbcSession {
        fn query(&mut self, sql: &str) -> AppResult<Vec<ResultRow>> {
            let Some(mut cursor) = self.connection.execute(sql, ()).map_err(query_error)? else {
                return Ok(Vec::new());
            };
            let names = cursor
                .column_names()
                .map_err(query_error)?
                .collect::<Result<Vec<String>, _>>()
                .map_err(query_error)?;
            let mut buffers =
                TextRowSet::for_cursor(BATCH_SIZE, &mut cursor, Some(MAX_TEXT_BYTES)).map_err(query_error)?;
            let mut row_cursor = cursor.bind_buffer(&mut buffers).map_err(query_error)?;

            let mut rows = Vec::new();
            while let Some(batch) = row_cursor.fetch().map_err(query_error)? {
                for row_index in 0..batch.num_rows() {
                    let mut row = ResultRow::new();
                    for (column_index, name) in names.iter().enumerate() {
                        let cell = batch
                            .at(column_index, row_index)
                            .map(|bytes| Cell::infer(&String::from_utf8_lossy(bytes)))
                            .unwrap_or(Cell::Null);
                        row.push(name.clone(), cell);
                    }
                    rows.push(row);
                }
            }
            Ok(rows)
        }
    }

    fn query_error(error: odbc_api::Error) -> AppError {
        AppError::QueryExecution(error.to_string())
    }
}

#[cfg(not(feature = "odbc"))]
mod odbc {
    use crate::adapters::SqlSession;
    use crate::errors::{AppError, AppResult};

    pub fn connect(_connection_string: &str) -> AppResult<Box<dyn SqlSession>> {
        Err(AppError::Connection(
            "ODBC driver support is not compiled in (build with --features odbc)".to_string(),
        ))
    }
}
