//! `mssql` backend: native TDS client through `tiberius`.
//!
//! The client is async. Each connection lives on its own worker thread with a
//! current-thread runtime, so callers see the same synchronous contract as
//! ODBC and the open query stream can stay alive between fetches.

use crate::db::config::ConnectionConfig;
use crate::db::driver::{DriverKind, NativeConnection, NativeConnector};
use crate::db::error::NativeError;
use crate::db::value::Value;
use crate::db::worker::{self, Session};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use std::time::Duration;
use tiberius::{
    AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, QueryItem, QueryStream,
};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

const DEFAULT_LOGIN_TIMEOUT: u32 = 15;

type TdsClient = Client<Compat<TcpStream>>;

fn normalize(error: tiberius::error::Error) -> NativeError {
    match &error {
        tiberius::error::Error::Server(token) => {
            NativeError::new(i64::from(token.code()), token.message())
        }
        _ => NativeError::generic(error.to_string()),
    }
}

fn tds_config(config: &ConnectionConfig, host: &str, port: u16) -> Config {
    let mut tds = Config::new();
    tds.host(host);
    tds.port(port);
    tds.database(&config.database);
    tds.application_name(&config.app);
    if let Some(login) = &config.login {
        tds.authentication(AuthMethod::sql_server(login, &config.password));
    }
    if config.encrypted {
        tds.encryption(EncryptionLevel::Required);
    } else {
        tds.encryption(EncryptionLevel::Off);
    }
    if config.trust_server_certificate {
        tds.trust_cert();
    }
    tds
}

async fn open(tds: Config, timeout: Duration) -> Result<TdsClient, NativeError> {
    let tcp = tokio::time::timeout(timeout, TcpStream::connect(tds.get_addr()))
        .await
        .map_err(|_| {
            NativeError::generic(format!("login timed out after {}s", timeout.as_secs()))
        })?
        .map_err(|e| NativeError::generic(e.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|e| NativeError::generic(e.to_string()))?;
    Client::connect(tds, tcp.compat_write())
        .await
        .map_err(normalize)
}

pub struct TdsConnector;

impl NativeConnector for TdsConnector {
    fn kind(&self) -> DriverKind {
        DriverKind::Mssql
    }

    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn NativeConnection>, NativeError> {
        let config = config.clone();
        worker::spawn(DriverKind::Mssql, move || TdsSession::open(&config))
    }
}

struct TdsSession {
    runtime: Runtime,
    client: TdsClient,
}

impl TdsSession {
    /// Log in to the primary address, then the replica if one is configured.
    fn open(config: &ConnectionConfig) -> Result<Self, NativeError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NativeError::generic(e.to_string()))?;
        let timeout = Duration::from_secs(config.timeout.unwrap_or(DEFAULT_LOGIN_TIMEOUT).into());

        let mut targets = vec![(config.network_host().to_string(), config.port)];
        targets.extend(config.replica_address());

        let mut last_error = NativeError::generic("no server address configured");
        for (host, port) in targets {
            let tds = tds_config(config, &host, port);
            match runtime.block_on(open(tds, timeout)) {
                Ok(client) => {
                    tracing::debug!(host = %host, port, "tds login succeeded");
                    return Ok(Self { runtime, client });
                }
                Err(err) => {
                    tracing::warn!(host = %host, port, error = %err, "tds login failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}

/// Open stream of a batch, positioned inside its first result set.
struct TdsCursor<'a> {
    runtime: &'a Runtime,
    stream: QueryStream<'a>,
}

impl Session for TdsSession {
    type Cursor<'a> = TdsCursor<'a>;

    fn execute(&mut self, sql: &str) -> Result<Option<(Vec<String>, TdsCursor<'_>)>, NativeError> {
        let Self { runtime, client } = self;
        let mut stream = runtime
            .block_on(client.simple_query(sql.to_string()))
            .map_err(normalize)?;
        let columns = runtime
            .block_on(first_columns(&mut stream))
            .map_err(normalize)?;
        Ok(columns.map(move |columns| (columns, TdsCursor { runtime, stream })))
    }

    fn fetch(cursor: &mut TdsCursor<'_>, max: usize) -> Result<Vec<Vec<Value>>, NativeError> {
        cursor
            .runtime
            .block_on(next_rows(&mut cursor.stream, max))
            .map_err(normalize)
    }

    fn close(self) -> Result<(), NativeError> {
        self.runtime.block_on(self.client.close()).map_err(normalize)
    }
}

/// Column names of the batch's first result set; `None` when it has none.
async fn first_columns(stream: &mut QueryStream<'_>) -> tiberius::Result<Option<Vec<String>>> {
    while let Some(item) = stream.try_next().await? {
        if let QueryItem::Metadata(meta) = item {
            return Ok(Some(
                meta.columns().iter().map(|c| c.name().to_string()).collect(),
            ));
        }
    }
    Ok(None)
}

/// Up to `max` rows of the current result set. Stops at the next result set.
async fn next_rows(stream: &mut QueryStream<'_>, max: usize) -> tiberius::Result<Vec<Vec<Value>>> {
    let mut rows = Vec::with_capacity(max);
    while rows.len() < max {
        match stream.try_next().await? {
            Some(QueryItem::Row(row)) => rows.push(row.into_iter().map(|data| decode(&data)).collect()),
            Some(QueryItem::Metadata(_)) | None => break,
        }
    }
    Ok(rows)
}

fn decode(data: &ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::F32(v) => v.map(|v| Value::Float(v.into())),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| Value::Text(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| Value::Text(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::Bytes(b.to_vec())),
        ColumnData::Numeric(v) => v.as_ref().map(|n| Value::Text(n.to_string())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|xml| Value::Text(xml.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data).ok().flatten().map(Value::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(data).ok().flatten().map(Value::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data).ok().flatten().map(Value::Time),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<Utc>::from_sql(data)
            .ok()
            .flatten()
            .map(|dt| Value::DateTime(dt.naive_utc())),
        #[allow(unreachable_patterns)]
        other => {
            tracing::warn!(column = ?other, "undecodable column read as NULL");
            None
        }
    };
    value.unwrap_or(Value::Null)
}
