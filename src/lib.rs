//! # Bolt Session
//!
//! Session and transaction execution core for a Bolt graph database driver.
//!
//! The crate sits between a connection pool and application code. It owns
//! the rules for running queries: which connection a unit of work uses, when
//! that connection goes back to the pool, which bookmarks travel with each
//! request, and how transaction functions are retried.
//!
//! ## Features
//!
//! - **Sessions** - Auto-commit queries, explicit transactions and retried transaction functions
//! - **Causal Consistency** - Bookmark tracking with an optional cross-session [`BookmarkManager`]
//! - **Retries** - Exponential back-off with jitter for transient failures
//! - **Async/Await** - Built on Tokio, with a blocking adapter for synchronous callers
//! - **Pluggable I/O** - [`Connection`] and [`ConnectionPool`] are traits
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bolt_session::{params, ConnectionPool, Session, SessionConfig};
//!
//! # async fn example(pool: Arc<dyn ConnectionPool>) -> bolt_session::DriverResult<()> {
//! let config = SessionConfig::builder()
//!     .with_database("movies")
//!     .with_write_access()
//!     .build();
//! let mut session = Session::new(pool, config);
//!
//! let mut result = session
//!     .run("CREATE (n:Person {name: $name}) RETURN n", Some(params! { "name" => "Alice" }))
//!     .await?;
//! while let Some(record) = result.next().await? {
//!     println!("{:?}", record);
//! }
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use bolt_session::{ConnectionPool, Session, SessionConfig, TransactionConfig};
//! # async fn example(pool: Arc<dyn ConnectionPool>) -> bolt_session::DriverResult<()> {
//! # let mut session = Session::new(pool, SessionConfig::default());
//! let tx = session.begin_transaction(TransactionConfig::new()).await?;
//! tx.run("CREATE (n:Node {id: 1})", None).await?;
//! tx.run("CREATE (n:Node {id: 2})", None).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transaction Functions
//!
//! For automatic retry on transient errors:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use bolt_session::{ConnectionPool, Session, SessionConfig};
//! # async fn example(pool: Arc<dyn ConnectionPool>) -> bolt_session::DriverResult<()> {
//! # let mut session = Session::new(pool, SessionConfig::default());
//! let count = session
//!     .execute_read(|tx| async move {
//!         let mut result = tx.run("MATCH (n) RETURN count(n) AS c", None).await?;
//!         result.single().await?.get_int("c")
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`DriverResult`]:
//!
//! ```rust
//! use bolt_session::DriverError;
//!
//! let err = DriverError::server("Neo.TransientError.Transaction.DeadlockDetected", "deadlock");
//! assert!(err.is_retryable());
//! assert!(!DriverError::session("Session closed").is_retryable());
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Session, transaction, result and collaborator types
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;

// Re-exports for convenience
pub use driver::{
    AccessMode, AuthToken, BlockingSession, BookmarkManager, Bookmarks, Connection,
    ConnectionPool, DriverError, DriverResult, EagerResult, InMemoryBookmarkManager,
    ManagedTransaction, NotificationFilter, Params, Query, QueryResult, Record, ResultSummary,
    RetryConfig, ServerAddress, ServerInfo, Session, SessionConfig, SessionConfigBuilder,
    Transaction, TransactionConfig, TransactionState, Value,
};
