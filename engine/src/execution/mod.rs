//! Execution of compiled statements.
//!
//! - [`Connection`] / [`Connector`]: the seam to the database, with a
//!   `ClickHouse` implementation in [`ClickHouseConnector`].
//! - [`ConnectionPool`]: bounded set of connections handed out exclusively.
//! - [`RetryPolicy`]: attempt budget and exponential backoff.
//! - [`QueryExecutor`]: ties the above together and reports metrics.

mod backend;
mod connection;
mod executor;
mod pool;
mod result;
mod retry;

pub use backend::{ClickHouseConnection, ClickHouseConnector};
pub use connection::{Connection, Connector, EngineFailure, FailureClass, QueryRows, Row};
pub use executor::QueryExecutor;
pub use pool::{ConnectionPool, PoolGuard, PoolStats};
pub use result::QueryResult;
pub use retry::RetryPolicy;
