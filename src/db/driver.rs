//! Backend selection and the seam every native client implements.
//!
//! Two mutually exclusive clients can talk to the server. The adapter picks one
//! at construction and drives it through [`NativeConnector`],
//! [`NativeConnection`] and [`NativeRows`]; everything above this module only
//! sees normalized [`NativeError`]s and decoded [`Value`]s.

use crate::db::config::ConnectionConfig;
use crate::db::error::{AdapterError, NativeError};
use crate::db::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Microsoft ODBC Driver for SQL Server.
    SqlSrv,
    /// Native TDS client.
    Mssql,
}

impl DriverKind {
    /// Detection order, richest backend first.
    pub const PREFERENCE: [DriverKind; 2] = [DriverKind::SqlSrv, DriverKind::Mssql];

    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::SqlSrv => "sqlsrv",
            DriverKind::Mssql => "mssql",
        }
    }

    /// Whether result handles from this backend can seek backwards.
    pub fn supports_seek(&self) -> bool {
        matches!(self, DriverKind::Mssql)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlsrv" | "odbc" => Ok(DriverKind::SqlSrv),
            "mssql" | "tds" => Ok(DriverKind::Mssql),
            other => Err(AdapterError::config(format!(
                "unknown driver '{}' (expected 'sqlsrv' or 'mssql')",
                other
            ))),
        }
    }
}

/// Backends compiled in and usable on this host, in preference order.
pub fn available_drivers() -> Vec<DriverKind> {
    #[allow(unused_mut)]
    let mut drivers = Vec::new();

    #[cfg(feature = "odbc")]
    {
        if crate::db::odbc::installed_driver().is_some() {
            drivers.push(DriverKind::SqlSrv);
        }
    }

    #[cfg(feature = "tds")]
    {
        drivers.push(DriverKind::Mssql);
    }

    drivers
}

/// An explicit choice always wins; otherwise the first available backend in
/// preference order.
pub fn select_driver(explicit: Option<DriverKind>, available: &[DriverKind]) -> Option<DriverKind> {
    explicit.or_else(|| {
        DriverKind::PREFERENCE
            .into_iter()
            .find(|kind| available.contains(kind))
    })
}

/// Built-in connector for a backend, if it was compiled in.
pub fn connector_for(kind: DriverKind) -> Result<Box<dyn NativeConnector>, AdapterError> {
    match kind {
        #[cfg(feature = "odbc")]
        DriverKind::SqlSrv => Ok(Box::new(crate::db::odbc::OdbcConnector)),
        #[cfg(feature = "tds")]
        DriverKind::Mssql => Ok(Box::new(crate::db::tds::TdsConnector)),
        #[allow(unreachable_patterns)]
        other => Err(AdapterError::unsupported(format!(
            "driver '{}' is not compiled in",
            other
        ))),
    }
}

/// What a native execute call produced.
pub enum Execution {
    /// The statement succeeded and returned no row set.
    Done,
    Rows(Box<dyn NativeRows>),
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Done => write!(f, "Done"),
            Execution::Rows(rows) => write!(f, "Rows({:?})", rows.columns()),
        }
    }
}

/// A native result handle.
pub trait NativeRows {
    fn columns(&self) -> &[String];

    /// Fetch the row under the native cursor and advance it.
    fn fetch(&mut self) -> Option<Vec<Value>>;

    /// Move the native cursor so the next fetch returns row `position`.
    fn seek(&mut self, _position: usize) -> bool {
        false
    }

    fn supports_seek(&self) -> bool {
        false
    }

    /// Release the handle's resources. Must tolerate repeated calls.
    fn free(&mut self);
}

/// A live native connection handle.
pub trait NativeConnection {
    fn execute(&mut self, sql: &str) -> Result<Execution, NativeError>;

    /// Most recent error reported by the backend, if any.
    fn last_error(&self) -> Option<NativeError>;

    fn close(&mut self) -> Result<(), NativeError>;
}

/// Opens native connections for one backend.
pub trait NativeConnector {
    fn kind(&self) -> DriverKind;

    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn NativeConnection>, NativeError>;
}

/// Pull-based source of decoded rows behind a row handle.
pub type RowSource = Box<dyn Iterator<Item = Vec<Value>>>;

fn exhausted() -> RowSource {
    Box::new(std::iter::empty())
}

/// Forward-only row handle; rows are pulled from the source one at a time.
pub struct ForwardRows {
    columns: Vec<String>,
    source: RowSource,
}

impl ForwardRows {
    pub fn new<I>(columns: Vec<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<Value>>,
        I::IntoIter: 'static,
    {
        Self {
            columns,
            source: Box::new(rows.into_iter()),
        }
    }
}

impl NativeRows for ForwardRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self) -> Option<Vec<Value>> {
        self.source.next()
    }

    fn free(&mut self) {
        self.source = exhausted();
    }
}

/// Row handle supporting seek. Rows pulled from the source are kept so the
/// cursor can move back over them; nothing is read ahead of the cursor.
pub struct ScrollRows {
    columns: Vec<String>,
    source: RowSource,
    fetched: Vec<Vec<Value>>,
    cursor: usize,
}

impl ScrollRows {
    pub fn new<I>(columns: Vec<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<Value>>,
        I::IntoIter: 'static,
    {
        Self {
            columns,
            source: Box::new(rows.into_iter()),
            fetched: Vec::new(),
            cursor: 0,
        }
    }

    /// Rows pulled from the source so far.
    pub fn fetched(&self) -> usize {
        self.fetched.len()
    }
}

impl Default for ScrollRows {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::<Vec<Value>>::new())
    }
}

impl NativeRows for ScrollRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self) -> Option<Vec<Value>> {
        if self.cursor == self.fetched.len() {
            let row = self.source.next()?;
            self.fetched.push(row);
        }
        let row = self.fetched.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(row)
    }

    fn seek(&mut self, position: usize) -> bool {
        while self.fetched.len() <= position {
            match self.source.next() {
                Some(row) => self.fetched.push(row),
                None => return false,
            }
        }
        self.cursor = position;
        true
    }

    fn supports_seek(&self) -> bool {
        true
    }

    fn free(&mut self) {
        self.source = exhausted();
        self.fetched = Vec::new();
        self.cursor = 0;
    }
}
