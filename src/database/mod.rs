//! # Database Operations
//!
//! Transactional persistence for tasks and configurations.
//!
//! - [`unit_of_work`] - commit/abort boundary over a [`StoreSession`]
//! - [`in_memory`] - store for tests and single-process use
//! - [`postgres`] - sqlx-backed store with bundled migrations
//! - [`connection`] - pool construction from configuration

pub mod connection;
pub mod errors;
pub mod in_memory;
pub mod postgres;
pub mod unit_of_work;

pub use connection::DatabaseConnection;
pub use errors::{StorageError, StorageResult};
pub use in_memory::{InMemoryStore, OperationCounts};
pub use postgres::PgStore;
pub use unit_of_work::{StoreSession, TaskFilter, TransactionalStore, UnitOfWork};
