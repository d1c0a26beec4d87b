//! SQL Server adapter facade.
//!
//! [`DatabaseAdapter`] is what a data-access framework programs against.
//! [`SqlSrvAdapter`] implements it over one [`Connection`], whichever native
//! backend was selected at construction.

use crate::db::{
    available_drivers, connector_for, decode_schema, describe_query, identity_column,
    select_driver, AdapterError, ColumnSchema, Connection, ConnectionConfig, DriverKind,
    ForwardRows, NativeConnector, NativeError, QueryOutcome, ResultSet, Schema, Value,
    SOURCES_QUERY,
};
use crate::dialect::{
    limit_clause, literal, quote_name, render, render_create, Page, Query, StatementKind,
};

/// Returns the identity generated by the last insert on this connection.
pub const LAST_INSERT_ID_QUERY: &str = "SELECT @@IDENTITY AS insertId";

/// Optional capabilities a framework may ask about.
pub const FEATURES: [(&str, bool); 4] = [
    ("arrays", false),
    ("transactions", false),
    ("booleans", true),
    ("relationships", true),
];

/// Operations a data-access framework needs from a relational adapter.
pub trait DatabaseAdapter {
    /// Open the connection. Failure is logged and reported as `false`.
    fn connect(&mut self) -> bool;

    /// Close the connection. Closing a closed adapter succeeds.
    fn disconnect(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    /// Table names of the connected database.
    fn sources(&mut self) -> Result<Vec<String>, AdapterError>;

    /// Column schemas of `table`, in catalog order. Unknown tables describe as empty.
    fn describe(&mut self, table: &str) -> Result<Schema, AdapterError>;

    /// Insert one row. Returns the row's identity value, when the table has one.
    fn create(&mut self, query: &Query) -> Result<Option<i64>, AdapterError>;

    fn read(&mut self, query: &Query) -> Result<ResultSet, AdapterError>;

    fn update(&mut self, query: &Query) -> Result<bool, AdapterError>;

    fn delete(&mut self, query: &Query) -> Result<bool, AdapterError>;

    /// SQL literal for a value, coerced to the column's type when given.
    fn value(&self, value: &Value, column: Option<&ColumnSchema>) -> String;

    /// Row-limit clause for a page, `None` without a limit.
    fn limit(&self, limit: Option<u64>, offset: u64) -> Option<String>;

    /// Identity generated by the last insert; `None` when there was none.
    fn last_insert_id(&mut self) -> Result<Option<i64>, AdapterError>;

    /// Whether an optional capability is supported; `None` for unknown names.
    fn enabled(&self, feature: &str) -> Option<bool>;

    /// Last error the native backend reported.
    fn error(&self) -> Option<NativeError>;
}

pub struct SqlSrvAdapter {
    config: ConnectionConfig,
    connector: Box<dyn NativeConnector>,
    connection: Connection,
    last_connect_error: Option<AdapterError>,
}

impl SqlSrvAdapter {
    /// Build an adapter over the configured backend, or the best one
    /// available on this host.
    pub fn new(config: ConnectionConfig) -> Result<Self, AdapterError> {
        let driver = select_driver(config.driver, &available_drivers())
            .ok_or_else(|| AdapterError::unsupported("no SQL Server client available"))?;
        let connector = connector_for(driver)?;
        Ok(Self::with_connector(config, connector))
    }

    /// Build an adapter over a caller-supplied backend.
    pub fn with_connector(config: ConnectionConfig, connector: Box<dyn NativeConnector>) -> Self {
        let driver = connector.kind();
        if config.driver.is_some_and(|d| d != driver) {
            tracing::warn!(configured = ?config.driver, %driver, "configured driver overridden by connector");
        }
        if !config.persistent {
            tracing::debug!("non-persistent connection requested; reuse is left to the caller");
        }
        Self {
            config,
            connector,
            connection: Connection::new(driver),
            last_connect_error: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> DriverKind {
        self.connection.driver()
    }

    /// Open the connection, returning the reason on failure.
    pub fn try_connect(&mut self) -> Result<(), AdapterError> {
        let result = self.connection.open(self.connector.as_ref(), &self.config);
        self.last_connect_error = result.as_ref().err().cloned();
        result
    }

    /// Why the last connect attempt failed.
    pub fn connect_error(&self) -> Option<&AdapterError> {
        self.last_connect_error.as_ref()
    }

    /// Execute raw SQL.
    pub fn execute(&mut self, sql: &str) -> Result<QueryOutcome, AdapterError> {
        self.connection.execute(sql)
    }

    /// Quote an identifier.
    pub fn name(&self, name: &str) -> String {
        quote_name(name)
    }

    /// Character sets are fixed at connect time; accepted for compatibility.
    pub fn encoding(&mut self, _encoding: &str) -> bool {
        true
    }

    pub fn result_columns(&self, result: &ResultSet) -> Vec<String> {
        result.columns().to_vec()
    }

    /// SQL text a statement kind would execute for `query`.
    pub fn render(&self, query: &Query, kind: StatementKind) -> String {
        render(&query.descriptor(kind))
    }

    pub fn create_table(&mut self, table: &str, schema: &Schema) -> Result<bool, AdapterError> {
        let sql = self.render(&Query::new(table).schema(schema.clone()), StatementKind::Schema);
        self.execute(&sql).map(|_| true)
    }

    pub fn drop_table(&mut self, table: &str) -> Result<bool, AdapterError> {
        let sql = format!("DROP TABLE {}", quote_name(table));
        self.execute(&sql).map(|_| true)
    }

    fn read_rows(&mut self, sql: &str) -> Result<ResultSet, AdapterError> {
        match self.execute(sql)? {
            QueryOutcome::Rows(rows) => Ok(rows),
            QueryOutcome::Done => Ok(ResultSet::new(
                self.driver(),
                Box::new(ForwardRows::new(Vec::new(), Vec::<Vec<Value>>::new())),
            )),
        }
    }

    /// Run an insert wrapped in identity-insert mode. The mode is switched off
    /// again even when the insert fails.
    fn insert_with_identity(&mut self, prelude: &str, insert: &str, epilogue: &str) -> Result<(), AdapterError> {
        self.execute(prelude)?;
        let inserted = self.execute(insert);
        let restored = self.execute(epilogue);
        inserted?;
        restored.map(|_| ())
    }
}

impl DatabaseAdapter for SqlSrvAdapter {
    fn connect(&mut self) -> bool {
        match self.try_connect() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(driver = %self.driver(), error = %err, "connect failed");
                false
            }
        }
    }

    fn disconnect(&mut self) -> bool {
        match self.connection.close() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(driver = %self.driver(), error = %err, "disconnect failed");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn sources(&mut self) -> Result<Vec<String>, AdapterError> {
        let rows = self.read_rows(SOURCES_QUERY)?;
        Ok(rows
            .filter_map(|row| row.get_index(0).filter(|v| !v.is_null()).map(Value::display))
            .collect())
    }

    fn describe(&mut self, table: &str) -> Result<Schema, AdapterError> {
        let mut rows = self.read_rows(&describe_query(table))?;
        let schema = decode_schema(&mut rows);
        if schema.is_empty() {
            tracing::debug!(table, "describe returned no columns");
        }
        Ok(schema)
    }

    fn create(&mut self, query: &Query) -> Result<Option<i64>, AdapterError> {
        let schema = match &query.schema {
            Some(schema) => schema.clone(),
            None => self.describe(&query.source)?,
        };
        let explicit_identity = query.writes_identity(&schema);
        let query = if query.schema.is_some() {
            query.clone()
        } else {
            query.clone().schema(schema.clone())
        };

        let statements = render_create(&query.descriptor(StatementKind::Create), explicit_identity);
        match (&statements.prelude, &statements.epilogue) {
            (Some(prelude), Some(epilogue)) => {
                tracing::debug!(table = %query.source, "identity insert");
                self.insert_with_identity(prelude, &statements.insert, epilogue)?;
            }
            _ => {
                self.execute(&statements.insert)?;
            }
        }

        let Some(identity) = identity_column(&schema) else {
            return Ok(None);
        };
        if explicit_identity {
            return Ok(query
                .data
                .iter()
                .find(|(field, _)| field == &identity.name)
                .and_then(|(_, value)| value.as_i64()));
        }
        self.last_insert_id()
    }

    fn read(&mut self, query: &Query) -> Result<ResultSet, AdapterError> {
        let sql = self.render(query, StatementKind::Read);
        self.read_rows(&sql)
    }

    fn update(&mut self, query: &Query) -> Result<bool, AdapterError> {
        if query.data.is_empty() {
            return Err(AdapterError::config("update without data"));
        }
        let sql = self.render(query, StatementKind::Update);
        self.execute(&sql).map(|_| true)
    }

    fn delete(&mut self, query: &Query) -> Result<bool, AdapterError> {
        let sql = self.render(query, StatementKind::Delete);
        self.execute(&sql).map(|_| true)
    }

    fn value(&self, value: &Value, column: Option<&ColumnSchema>) -> String {
        literal(value, column)
    }

    fn limit(&self, limit: Option<u64>, offset: u64) -> Option<String> {
        limit_clause(Page::new(limit, offset))
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>, AdapterError> {
        let mut rows = self.read_rows(LAST_INSERT_ID_QUERY)?;
        let id = rows.next().and_then(|row| {
            let value = row.get("insertId").or_else(|| row.get_index(0))?.clone();
            value.as_i64()
        });
        rows.close();
        Ok(id.filter(|id| *id != 0))
    }

    fn enabled(&self, feature: &str) -> Option<bool> {
        FEATURES
            .iter()
            .find(|(name, _)| *name == feature)
            .map(|(_, enabled)| *enabled)
    }

    fn error(&self) -> Option<NativeError> {
        self.connection.error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AbstractType;

    struct Unreachable;

    impl NativeConnector for Unreachable {
        fn kind(&self) -> DriverKind {
            DriverKind::Mssql
        }

        fn connect(
            &self,
            _config: &ConnectionConfig,
        ) -> Result<Box<dyn crate::db::NativeConnection>, NativeError> {
            Err(NativeError::new(18456, "Login failed for user 'sa'."))
        }
    }

    fn adapter() -> SqlSrvAdapter {
        SqlSrvAdapter::with_connector(ConnectionConfig::new("app"), Box::new(Unreachable))
    }

    #[test]
    fn test_enabled() {
        let adapter = adapter();
        assert_eq!(adapter.enabled("arrays"), Some(false));
        assert_eq!(adapter.enabled("transactions"), Some(false));
        assert_eq!(adapter.enabled("booleans"), Some(true));
        assert_eq!(adapter.enabled("relationships"), Some(true));
        assert_eq!(adapter.enabled("teleport"), None);
    }

    #[test]
    fn test_limit() {
        let adapter = adapter();
        assert_eq!(adapter.limit(Some(10), 0).as_deref(), Some("TOP 10"));
        let paged = adapter.limit(Some(10), 20).unwrap();
        assert_ne!(paged, "TOP 10");
        assert!(paged.contains("BETWEEN 21 AND 30"));
        assert_eq!(adapter.limit(None, 0), None);
    }

    #[test]
    fn test_value_delegates_to_coercion() {
        let adapter = adapter();
        assert_eq!(adapter.value(&Value::Null, None), "NULL");
        assert_eq!(adapter.value(&Value::from("it's"), None), "'it''s'");
        let flag = ColumnSchema::new("flag", AbstractType::Boolean);
        assert_eq!(adapter.value(&Value::from("true"), Some(&flag)), "1");
    }

    #[test]
    fn test_failed_connect_reports_false() {
        let mut adapter = adapter();
        assert!(!adapter.connect());
        assert!(!adapter.is_connected());
        assert!(matches!(
            adapter.connect_error(),
            Some(AdapterError::Connection { message }) if message.contains("18456")
        ));
        assert!(adapter.disconnect());
    }

    #[test]
    fn test_missing_database_fails_connect() {
        let mut adapter =
            SqlSrvAdapter::with_connector(ConnectionConfig::default(), Box::new(Unreachable));
        assert!(!adapter.connect());
        assert!(matches!(adapter.connect_error(), Some(AdapterError::Config { .. })));
    }

    #[test]
    fn test_operations_require_connection() {
        let mut adapter = adapter();
        assert!(matches!(adapter.sources(), Err(AdapterError::NotConnected)));
        assert!(matches!(adapter.execute("SELECT 1"), Err(AdapterError::NotConnected)));
    }

    #[test]
    fn test_name_and_encoding() {
        let mut adapter = adapter();
        assert_eq!(adapter.name("dbo.users"), "[dbo].[users]");
        assert!(adapter.encoding("UTF-8"));
    }
}
