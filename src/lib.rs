pub mod adapter;
pub mod db;
pub mod dialect;

pub use adapter::{DatabaseAdapter, SqlSrvAdapter};
pub use db::{AdapterError, ConnectionConfig, DriverKind, ResultSet, Row, Schema, Value};
pub use dialect::{Direction, Join, JoinKind, Query, StatementKind};
