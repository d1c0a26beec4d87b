use crate::db::driver::{DriverKind, NativeRows};
use crate::db::value::Value;
use std::fmt;
use std::sync::Arc;

/// One decoded row; column names are shared with the owning result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Cursor over a native result handle.
///
/// Rows are pulled one at a time with [`Iterator::next`]. `position` counts the
/// rows advanced so far, so the current row sits at index `position - 1`. The
/// native handle is released exactly once: on exhaustion, on [`close`], or on
/// drop, whichever comes first.
///
/// [`close`]: ResultSet::close
pub struct ResultSet {
    driver: DriverKind,
    handle: Option<Box<dyn NativeRows>>,
    columns: Arc<[String]>,
    position: usize,
    current: Option<Row>,
}

impl ResultSet {
    pub fn new(driver: DriverKind, handle: Box<dyn NativeRows>) -> Self {
        let columns: Arc<[String]> = handle.columns().to_vec().into();
        Self {
            driver,
            handle: Some(handle),
            columns,
            position: 0,
            current: None,
        }
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Whether [`prev`](ResultSet::prev) can ever return a row.
    pub fn supports_prev(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.supports_seek())
    }

    /// Step back to the row before the current one.
    ///
    /// The current row sits at native index `position - 1`, so the cursor seeks
    /// to `position - 2` and re-fetches: after two `next` calls this returns the
    /// first row, not the current one again. Returns `None` at the first row,
    /// after close, or when the backend cannot seek.
    pub fn prev(&mut self) -> Option<Row> {
        if self.position < 2 {
            return None;
        }
        let handle = self.handle.as_mut()?;
        if !handle.supports_seek() || !handle.seek(self.position - 2) {
            return None;
        }
        let values = handle.fetch()?;
        let row = Row::new(self.columns.clone(), values);
        self.position -= 1;
        self.current = Some(row.clone());
        Some(row)
    }

    /// Release the native handle. Closing a closed result does nothing.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.free();
            tracing::trace!(driver = %self.driver, rows = self.position, "result closed");
        }
        self.current = None;
    }
}

impl Iterator for ResultSet {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let handle = self.handle.as_mut()?;
        match handle.fetch() {
            Some(values) => {
                let row = Row::new(self.columns.clone(), values);
                self.position += 1;
                self.current = Some(row.clone());
                Some(row)
            }
            None => {
                self.close();
                None
            }
        }
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("driver", &self.driver)
            .field("columns", &self.columns)
            .field("position", &self.position)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Result of executing one statement through a connection.
#[derive(Debug)]
pub enum QueryOutcome {
    /// Success without a row set (INSERT, UPDATE, DDL, ...).
    Done,
    Rows(ResultSet),
}

impl QueryOutcome {
    pub fn into_rows(self) -> Option<ResultSet> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Done => None,
        }
    }
}
