//! Database access layer.
//!
//! - Connection pool registry, one pool per named backend
//! - Query execution with a per-query connection bracket
//! - Row-to-JSON type mappings

pub mod executor;
pub(crate) mod params;
pub mod pool;
pub mod types;

pub use executor::QueryExecutor;
pub use pool::{DbPool, PoolRegistry};
pub use types::RowToJson;
