//! `PostgreSQL` outbox store for the Outbox Relay.
//!
//! This crate provides a production-ready `PostgreSQL`-based implementation
//! of the `OutboxStore` trait from `outbox-relay-core`. It uses sqlx and
//! supports:
//!
//! - Token-checked conditional updates for claim and finalize
//! - Transactional capture via [`PostgresOutboxStore::insert_in_tx`]
//! - Connection pooling
//! - Schema bootstrap for development and tests
//!
//! # Example
//!
//! ```ignore
//! use outbox_relay_postgres::PostgresOutboxStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresOutboxStore::connect("postgres://localhost/mydb").await?;
//!     store.ensure_schema().await?;
//!     Ok(())
//! }
//! ```

mod store;

pub use store::PostgresOutboxStore;
