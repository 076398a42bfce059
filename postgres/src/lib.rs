//! `PostgreSQL` store for the prize-draw allocation engine.
//!
//! This crate implements the unit-of-work traits from `prizedraw-core` on top
//! of sqlx and supports:
//!
//! - Row locks, advisory locks and `SKIP LOCKED` claims
//! - Per-transaction lock and statement timeouts
//! - Connection pooling
//! - Embedded schema migrations
//!
//! # Example
//!
//! ```no_run
//! use prizedraw_core::{TransactionalStore, UnitOfWork};
//! use prizedraw_postgres::{PgStore, PostgresConfig};
//!
//! # async fn example() -> Result<(), prizedraw_core::StoreError> {
//! let store = PgStore::connect(&PostgresConfig::from_env()).await?;
//! store.migrate().await?;
//!
//! let tx = store.begin().await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod store;

pub use config::PostgresConfig;
pub use error::map_sqlx_error;
pub use store::{PgStore, PgTx};
