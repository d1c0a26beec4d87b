use crate::db::config::ConnectionConfig;
use crate::db::driver::{DriverKind, Execution, NativeConnection, NativeConnector};
use crate::db::error::{AdapterError, NativeError};
use crate::db::result::{QueryOutcome, ResultSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Only observable while the native connect call is in flight.
    Connecting,
    Connected,
}

/// One native handle plus the backend it belongs to.
///
/// A failed connect returns to `Disconnected`, so the caller may retry.
pub struct Connection {
    driver: DriverKind,
    handle: Option<Box<dyn NativeConnection>>,
    state: ConnectionState,
}

impl Connection {
    pub fn new(driver: DriverKind) -> Self {
        Self {
            driver,
            handle: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn open(
        &mut self,
        connector: &dyn NativeConnector,
        config: &ConnectionConfig,
    ) -> Result<(), AdapterError> {
        if self.is_connected() {
            return Ok(());
        }
        config.validate()?;

        self.state = ConnectionState::Connecting;
        match connector.connect(config) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = ConnectionState::Connected;
                tracing::info!(driver = %self.driver, target = %config.display_string(), "connected");
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                Err(AdapterError::connection(err))
            }
        }
    }

    /// Close the native handle. Closing a disconnected connection succeeds.
    pub fn close(&mut self) -> Result<(), AdapterError> {
        let Some(mut handle) = self.handle.take() else {
            self.state = ConnectionState::Disconnected;
            return Ok(());
        };
        self.state = ConnectionState::Disconnected;
        handle.close().map_err(AdapterError::connection)?;
        tracing::info!(driver = %self.driver, "disconnected");
        Ok(())
    }

    /// Execute one statement. A backend failure becomes a query error carrying
    /// the SQL text.
    pub fn execute(&mut self, sql: &str) -> Result<QueryOutcome, AdapterError> {
        let handle = self.handle.as_mut().ok_or(AdapterError::NotConnected)?;
        tracing::debug!(driver = %self.driver, sql, "execute");

        match handle.execute(sql) {
            Ok(Execution::Done) => Ok(QueryOutcome::Done),
            Ok(Execution::Rows(rows)) => Ok(QueryOutcome::Rows(ResultSet::new(self.driver, rows))),
            Err(err) => {
                tracing::warn!(driver = %self.driver, code = err.code, error = %err.message, "statement failed");
                Err(AdapterError::query(sql, err))
            }
        }
    }

    /// Last error the native backend reported.
    pub fn error(&self) -> Option<NativeError> {
        self.handle.as_ref().and_then(|h| h.last_error())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "close on drop failed");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.driver)
            .field("state", &self.state)
            .finish()
    }
}
