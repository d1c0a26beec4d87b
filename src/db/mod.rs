mod config;
mod connection;
mod driver;
mod error;
#[cfg(feature = "odbc")]
mod odbc;
mod result;
mod schema;
#[cfg(feature = "tds")]
mod tds;
mod value;
#[cfg_attr(not(any(feature = "tds", feature = "odbc")), allow(dead_code))]
mod worker;

pub use config::*;
pub use connection::*;
pub use driver::*;
pub use error::*;
pub use result::*;
pub use schema::*;
pub use value::*;
