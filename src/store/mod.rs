//! Persistence layer: the `JobStore` trait and its libSQL backend.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlJobStore;
pub use traits::JobStore;
