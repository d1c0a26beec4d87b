use crate::db::driver::DriverKind;
use crate::db::error::AdapterError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "(local)";
pub const DEFAULT_PORT: u16 = 1433;

/// Character set hint passed to the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Server default code page
    #[default]
    Char,
    Binary,
    #[serde(rename = "utf-8")]
    Utf8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Required; connecting without it fails.
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection reuse hint.
    #[serde(default = "default_true")]
    pub persistent: bool,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub encrypted: bool,
    /// Accept self-signed server certificates when encryption is on.
    #[serde(default)]
    pub trust_server_certificate: bool,
    /// Failover partner, `host` or `host,port`.
    #[serde(default)]
    pub replica: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Application name reported to the server for tracing.
    #[serde(default = "default_app")]
    pub app: String,
    /// Login timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    /// Explicit backend; detected at construction when absent.
    #[serde(default)]
    pub driver: Option<DriverKind>,
}

fn default_name() -> String {
    String::from("default")
}

fn default_host() -> String {
    String::from(DEFAULT_HOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_app() -> String {
    String::from("app")
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            database: String::new(),
            host: default_host(),
            port: DEFAULT_PORT,
            persistent: true,
            encoding: Encoding::default(),
            encrypted: false,
            trust_server_certificate: false,
            replica: None,
            login: None,
            password: String::new(),
            app: default_app(),
            timeout: None,
            driver: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.database.trim().is_empty() {
            return Err(AdapterError::config("no database specified"));
        }
        Ok(())
    }

    /// Host name usable for a TCP connect. The local aliases resolve to loopback.
    pub fn network_host(&self) -> &str {
        match self.host.trim() {
            "" | "(local)" | "." => "localhost",
            host => host,
        }
    }

    /// Split the replica address into host and port, defaulting to our port.
    pub fn replica_address(&self) -> Option<(String, u16)> {
        let replica = self.replica.as_deref()?.trim();
        if replica.is_empty() {
            return None;
        }
        match replica.split_once([',', ':']) {
            Some((host, port)) => {
                let port = port.trim().parse().unwrap_or(self.port);
                Some((host.trim().to_string(), port))
            }
            None => Some((replica.to_string(), self.port)),
        }
    }

    /// ODBC connection string for the given installed driver name.
    pub fn odbc_connection_string(&self, driver_name: &str) -> String {
        let mut parts = vec![
            format!("Driver={}", quote_odbc_value(driver_name)),
            format!("Server={},{}", quote_odbc_value(&self.host), self.port),
            format!("Database={}", quote_odbc_value(&self.database)),
        ];

        match self.login.as_deref() {
            Some(login) => {
                parts.push(format!("UID={}", quote_odbc_value(login)));
                parts.push(format!("PWD={}", quote_odbc_value(&self.password)));
            }
            None => parts.push("Trusted_Connection=yes".to_string()),
        }

        parts.push(format!("Encrypt={}", if self.encrypted { "yes" } else { "no" }));
        if self.trust_server_certificate {
            parts.push("TrustServerCertificate=yes".to_string());
        }
        if let Some(replica) = self.replica.as_deref().filter(|r| !r.is_empty()) {
            parts.push(format!("Failover_Partner={}", quote_odbc_value(replica)));
        }
        if self.encoding == Encoding::Utf8 {
            parts.push("AutoTranslate=no".to_string());
        }
        parts.push(format!("APP={}", quote_odbc_value(&self.app)));

        parts.join(";") + ";"
    }

    /// Connection summary without secrets.
    pub fn display_string(&self) -> String {
        match &self.login {
            Some(login) => format!("{}@{},{}/{}", login, self.host, self.port, self.database),
            None => format!("{},{}/{}", self.host, self.port, self.database),
        }
    }

    pub fn get_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sqlsrv-adapter")
            .join("connections.toml")
    }

    pub fn load_saved_connections() -> Result<Vec<ConnectionConfig>, AdapterError> {
        let path = Self::get_config_path();
        if !path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| AdapterError::config(format!("{}: {}", path.display(), e)))?;
        Self::parse_saved_connections(&content)
    }

    pub fn parse_saved_connections(content: &str) -> Result<Vec<ConnectionConfig>, AdapterError> {
        let connections: SavedConnections = toml::from_str(content)
            .map_err(|e| AdapterError::config(format!("saved connections: {}", e)))?;
        Ok(connections.connections)
    }

    pub fn save_connections(connections: &[ConnectionConfig]) -> Result<(), AdapterError> {
        let path = Self::get_config_path();
        let io_error = |e: std::io::Error| AdapterError::config(format!("{}: {}", path.display(), e));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let saved = SavedConnections {
            connections: connections.to_vec(),
        };
        let content = toml::to_string_pretty(&saved)
            .map_err(|e| AdapterError::config(format!("saved connections: {}", e)))?;
        std::fs::write(&path, content).map_err(io_error)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedConnections {
    #[serde(default)]
    connections: Vec<ConnectionConfig>,
}

/// Quote an ODBC attribute value when it carries separators or braces.
/// Braced values escape a closing brace by doubling it.
fn quote_odbc_value(value: &str) -> String {
    if value.contains([';', '{', '}']) || value.starts_with(' ') || value.ends_with(' ') {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}
