//! `sqlsrv` backend: Microsoft ODBC Driver for SQL Server through `odbc-api`.

use crate::db::config::{ConnectionConfig, Encoding};
use crate::db::driver::{DriverKind, NativeConnection, NativeConnector};
use crate::db::error::NativeError;
use crate::db::value::Value;
use crate::db::worker::{self, Session};
use odbc_api::handles::StatementImpl;
use odbc_api::{Connection, ConnectionOptions, Cursor, CursorImpl, Environment, ResultSetMetadata};
use std::sync::OnceLock;

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

/// Process-wide ODBC environment, created on first use.
fn environment() -> Result<&'static Environment, NativeError> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(normalize)?;
    Ok(ENVIRONMENT.get_or_init(|| env))
}

/// Newest installed SQL Server ODBC driver, e.g. "ODBC Driver 18 for SQL Server".
pub fn installed_driver() -> Option<String> {
    let env = environment().ok()?;
    let drivers = env.drivers().ok()?;
    drivers
        .into_iter()
        .map(|info| info.description)
        .filter(|name| name.contains("for SQL Server"))
        .max()
}

fn normalize(error: odbc_api::Error) -> NativeError {
    match &error {
        odbc_api::Error::Diagnostics { record, .. } => {
            NativeError::new(i64::from(record.native_error), error.to_string())
        }
        _ => NativeError::generic(error.to_string()),
    }
}

pub struct OdbcConnector;

impl NativeConnector for OdbcConnector {
    fn kind(&self) -> DriverKind {
        DriverKind::SqlSrv
    }

    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn NativeConnection>, NativeError> {
        let config = config.clone();
        worker::spawn(DriverKind::SqlSrv, move || OdbcSession::open(&config))
    }
}

struct OdbcSession {
    conn: Connection<'static>,
}

impl OdbcSession {
    fn open(config: &ConnectionConfig) -> Result<Self, NativeError> {
        let env = environment()?;
        let driver = installed_driver()
            .ok_or_else(|| NativeError::generic("no SQL Server ODBC driver installed"))?;
        if config.encoding == Encoding::Binary {
            tracing::debug!("binary encoding requested; ODBC reads text columns as narrow strings");
        }

        let conn_str = config.odbc_connection_string(&driver);
        let conn = env
            .connect_with_connection_string(
                &conn_str,
                ConnectionOptions {
                    login_timeout_sec: config.timeout,
                    ..Default::default()
                },
            )
            .map_err(normalize)?;
        Ok(Self { conn })
    }
}

/// Forward-only statement cursor. Every cell is read back as text.
struct OdbcCursor<'a> {
    cursor: CursorImpl<StatementImpl<'a>>,
    width: usize,
    buf: Vec<u8>,
}

impl OdbcCursor<'_> {
    fn rows(&mut self, max: usize) -> Result<Vec<Vec<Value>>, odbc_api::Error> {
        let mut rows = Vec::with_capacity(max);
        while rows.len() < max {
            let Some(mut row) = self.cursor.next_row()? else {
                break;
            };
            let mut values = Vec::with_capacity(self.width);
            for col in 1..=self.width as u16 {
                self.buf.clear();
                let value = if row.get_text(col, &mut self.buf)? {
                    Value::Text(String::from_utf8_lossy(&self.buf).into_owned())
                } else {
                    Value::Null
                };
                values.push(value);
            }
            rows.push(values);
        }
        Ok(rows)
    }
}

impl Session for OdbcSession {
    type Cursor<'a> = OdbcCursor<'a>;

    fn execute(&mut self, sql: &str) -> Result<Option<(Vec<String>, OdbcCursor<'_>)>, NativeError> {
        let Some(mut cursor) = self.conn.execute(sql, (), None).map_err(normalize)? else {
            return Ok(None);
        };
        let columns = cursor
            .column_names()
            .map_err(normalize)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(normalize)?;
        let width = columns.len();
        Ok(Some((
            columns,
            OdbcCursor {
                cursor,
                width,
                buf: Vec::new(),
            },
        )))
    }

    fn fetch(cursor: &mut OdbcCursor<'_>, max: usize) -> Result<Vec<Vec<Value>>, NativeError> {
        cursor.rows(max).map_err(normalize)
    }

    fn close(self) -> Result<(), NativeError> {
        // Dropping the handle disconnects.
        drop(self.conn);
        Ok(())
    }
}
