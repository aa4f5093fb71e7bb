//! Driver Module
//!
//! 세션/트랜잭션 실행 코어
//!
//! # 구성
//!
//! - 세션 (Session, SessionConfig, Query)
//! - 트랜잭션 (Transaction, ManagedTransaction, TransactionConfig)
//! - 결과 (QueryResult, ResultSummary, EagerResult)
//! - 재시도 (RetryConfig, RetryContext)
//! - 북마크 (Bookmarks, BookmarkManager)
//! - 협력자 트레이트 (Connection, ConnectionPool)
//! - 동기 어댑터 (BlockingSession)
//!
//! # Example
//!
//! ```ignore
//! use bolt_session::driver::{Session, SessionConfig, TransactionConfig};
//!
//! let mut session = Session::new(pool, SessionConfig::default());
//!
//! // 쿼리 실행
//! let mut result = session.run("MATCH (n) RETURN n LIMIT 10", None).await?;
//! while let Some(record) = result.next().await? {
//!     println!("{:?}", record);
//! }
//!
//! // 트랜잭션
//! let tx = session.begin_transaction(TransactionConfig::new()).await?;
//! tx.run("CREATE (n:Person {name: $name})", Some(params! {"name" => "Alice"})).await?;
//! tx.commit().await?;
//!
//! // 트랜잭션 함수 (재시도)
//! let count = session
//!     .execute_read(|tx| async move {
//!         let mut result = tx.run("MATCH (n) RETURN count(n) AS c", None).await?;
//!         result.single().await?.get_int("c")
//!     })
//!     .await?;
//!
//! session.close().await;
//! ```

mod auth;
mod blocking;
mod bookmarks;
mod connection;
mod error;
mod pool;
mod record;
mod result;
mod retry;
mod session;
mod telemetry;
mod transaction;
mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use auth::{AuthToken, ServerAddress, ServerInfo};
pub use blocking::{BlockingManagedTransaction, BlockingResult, BlockingSession, BlockingTransaction};
pub use bookmarks::{BookmarkManager, Bookmarks, InMemoryBookmarkManager};
pub use connection::{
    AccessMode, BeginRequest, BeginResponse, Connection, NotificationClassification,
    NotificationFilter, NotificationMinSeverity, PullResponse, RunRequest, RunResponse,
};
pub use error::{DriverError, DriverResult, ServerError};
pub use pool::{
    AcquireRequest, ConnectionPool, Connector, DatabaseCallback, DirectPool, PoolConfig,
    PoolConfigBuilder, PoolMetrics, RoutingTableRequest,
};
pub use record::Record;
pub use result::{
    Counters, EagerResult, InputPosition, Notification, QueryResult, QueryType, ResultSummary,
};
pub use retry::{RetryConfig, RetryContext, RetryDecision};
pub use session::{IntoQuery, Query, Session, SessionConfig, SessionConfigBuilder};
pub use telemetry::{TelemetryApi, WorkKind};
pub use transaction::{ManagedTransaction, Transaction, TransactionConfig, TransactionState};
pub use types::{extract_reserved, merge_parameters, Params, RunOverrides, Value, RESERVED_KEYS};
