//! Blocking Session - 동기 어댑터
//!
//! 비동기 세션과 같은 상태 머신을 전용 current-thread 런타임 위에서 실행합니다.
//! 비동기 컨텍스트 안에서 사용하면 안 됩니다 (런타임 중첩).

use std::fmt;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use super::auth::ServerInfo;
use super::bookmarks::Bookmarks;
use super::connection::AccessMode;
use super::error::{DriverError, DriverResult};
use super::pool::ConnectionPool;
use super::record::Record;
use super::result::{QueryResult, ResultSummary};
use super::retry::RetryContext;
use super::session::{IntoQuery, Session, SessionConfig};
use super::telemetry::WorkKind;
use super::transaction::{ManagedTransaction, Transaction, TransactionConfig, TransactionState};
use super::types::Params;

// ============================================================================
// BlockingSession
// ============================================================================

/// 동기 세션
pub struct BlockingSession {
    runtime: Arc<Runtime>,
    session: Session,
}

impl BlockingSession {
    /// 새 동기 세션 생성
    pub fn new(pool: Arc<dyn ConnectionPool>, config: SessionConfig) -> DriverResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DriverError::configuration(format!("Failed to create runtime: {}", e)))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            session: Session::new(pool, config),
        })
    }

    /// 세션 설정
    pub fn config(&self) -> &SessionConfig {
        self.session.config()
    }

    /// 연결 보유 여부
    pub fn has_connection(&self) -> bool {
        self.session.has_connection()
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// 쿼리 실행 (auto-commit)
    pub fn run(
        &mut self,
        query: impl IntoQuery,
        parameters: Option<Params>,
    ) -> DriverResult<BlockingResult> {
        let result = self.runtime.block_on(self.session.run(query, parameters))?;
        Ok(BlockingResult {
            runtime: Arc::clone(&self.runtime),
            result,
        })
    }

    /// 명시적 트랜잭션 시작
    pub fn begin_transaction(&mut self, config: TransactionConfig) -> DriverResult<BlockingTransaction> {
        let tx = self
            .runtime
            .block_on(self.session.begin_transaction(config))?;
        Ok(BlockingTransaction {
            runtime: Arc::clone(&self.runtime),
            tx,
        })
    }

    /// 읽기 트랜잭션 함수
    pub fn execute_read<F, T>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(&BlockingManagedTransaction) -> DriverResult<T>,
    {
        self.execute(AccessMode::Read, TransactionConfig::default(), work)
    }

    /// 쓰기 트랜잭션 함수
    pub fn execute_write<F, T>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(&BlockingManagedTransaction) -> DriverResult<T>,
    {
        self.execute(AccessMode::Write, TransactionConfig::default(), work)
    }

    /// 설정을 지정한 트랜잭션 함수
    pub fn execute_with_config<F, T>(
        &mut self,
        mode: AccessMode,
        config: TransactionConfig,
        work: F,
    ) -> DriverResult<T>
    where
        F: FnMut(&BlockingManagedTransaction) -> DriverResult<T>,
    {
        self.execute(mode, config, work)
    }

    fn execute<F, T>(&mut self, mode: AccessMode, config: TransactionConfig, mut work: F) -> DriverResult<T>
    where
        F: FnMut(&BlockingManagedTransaction) -> DriverResult<T>,
    {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.session.prepare_transaction_work())?;

        let api = WorkKind::TransactionFunction.classify();
        let mut retry = RetryContext::new(&self.session.config().retry);

        loop {
            let outcome = match runtime.block_on(self.session.open_transaction(mode, api, &config)) {
                Ok(tx) => {
                    let managed = BlockingManagedTransaction {
                        runtime: Arc::clone(&runtime),
                        tx: ManagedTransaction::new(Arc::clone(&tx)),
                    };
                    let outcome = work(&managed);
                    runtime.block_on(tx.settle(outcome))
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(failure) => std::thread::sleep(retry.backoff(failure)?),
            }
        }
    }

    /// 세션이 만든 북마크
    pub fn last_bookmarks(&mut self) -> DriverResult<Bookmarks> {
        self.runtime.block_on(self.session.last_bookmarks())
    }

    /// 서버 정보
    pub fn server_info(&mut self) -> DriverResult<ServerInfo> {
        self.runtime.block_on(self.session.server_info())
    }

    /// 세션 닫기
    pub fn close(&mut self) {
        self.runtime.block_on(self.session.close());
    }
}

impl fmt::Debug for BlockingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingSession")
            .field("session", &self.session)
            .finish()
    }
}

impl Drop for BlockingSession {
    fn drop(&mut self) {
        if self.session.is_open() {
            self.runtime.block_on(self.session.close());
        }
    }
}

// ============================================================================
// BlockingResult
// ============================================================================

/// 동기 쿼리 결과
///
/// `Iterator`로 레코드를 하나씩 가져옵니다.
pub struct BlockingResult {
    runtime: Arc<Runtime>,
    result: QueryResult,
}

impl BlockingResult {
    /// 컬럼 키
    pub fn keys(&self) -> &[String] {
        self.result.keys()
    }

    /// 정확히 한 개의 레코드
    pub fn single(&mut self) -> DriverResult<Record> {
        self.runtime.block_on(self.result.single())
    }

    /// 남은 레코드를 버리고 요약 반환
    pub fn consume(&mut self) -> DriverResult<ResultSummary> {
        self.runtime.block_on(self.result.consume())
    }

    /// 열림 여부
    pub fn is_open(&self) -> bool {
        self.result.is_open()
    }
}

impl Iterator for BlockingResult {
    type Item = DriverResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.result.next()).transpose()
    }
}

impl fmt::Debug for BlockingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingResult")
            .field("keys", &self.result.keys())
            .finish()
    }
}

// ============================================================================
// BlockingTransaction
// ============================================================================

/// 동기 명시적 트랜잭션
pub struct BlockingTransaction {
    runtime: Arc<Runtime>,
    tx: Transaction,
}

impl BlockingTransaction {
    /// 쿼리 실행
    pub fn run(&self, query: impl IntoQuery, parameters: Option<Params>) -> DriverResult<BlockingResult> {
        let result = self.runtime.block_on(self.tx.run(query, parameters))?;
        Ok(BlockingResult {
            runtime: Arc::clone(&self.runtime),
            result,
        })
    }

    /// 커밋
    pub fn commit(&self) -> DriverResult<()> {
        self.runtime.block_on(self.tx.commit())
    }

    /// 롤백
    pub fn rollback(&self) -> DriverResult<()> {
        self.runtime.block_on(self.tx.rollback())
    }

    /// 닫기
    pub fn close(&self) -> DriverResult<()> {
        self.runtime.block_on(self.tx.close())
    }

    /// 현재 상태
    pub fn state(&self) -> TransactionState {
        self.tx.state()
    }

    /// 열림 여부
    pub fn is_open(&self) -> bool {
        self.tx.is_open()
    }
}

impl fmt::Debug for BlockingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingTransaction")
            .field("state", &self.tx.state())
            .finish()
    }
}

/// 동기 트랜잭션 함수에 전달되는 트랜잭션
pub struct BlockingManagedTransaction {
    runtime: Arc<Runtime>,
    tx: ManagedTransaction,
}

impl BlockingManagedTransaction {
    /// 쿼리 실행
    pub fn run(&self, query: impl IntoQuery, parameters: Option<Params>) -> DriverResult<BlockingResult> {
        let result = self.runtime.block_on(self.tx.run(query, parameters))?;
        Ok(BlockingResult {
            runtime: Arc::clone(&self.runtime),
            result,
        })
    }

    /// 열림 여부
    pub fn is_open(&self) -> bool {
        self.tx.is_open()
    }
}

impl fmt::Debug for BlockingManagedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingManagedTransaction")
            .field("tx", &self.tx)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::retry::RetryConfig;
    use crate::driver::testing::{Behavior, Call, FakePool};
    use crate::driver::telemetry::TelemetryApi;
    use crate::driver::types::Value;
    use crate::params;

    fn session(pool: &Arc<FakePool>, config: SessionConfig) -> BlockingSession {
        BlockingSession::new(pool.clone(), config).unwrap()
    }

    #[test]
    fn test_blocking_run_iterates_records() {
        let behavior = Behavior {
            records: (1..=5).map(|i| vec![Value::Integer(i)]).collect(),
            ..Behavior::default()
        };
        let pool = FakePool::direct(behavior);
        let mut session = session(&pool, SessionConfig::new().with_fetch_size(2));

        let result = session.run("UNWIND range(1, 5) AS n RETURN n", None).unwrap();
        assert!(session.has_connection());
        let values: Vec<i64> = result
            .map(|record| record.and_then(|r| r.get_int("n")))
            .collect::<DriverResult<_>>()
            .unwrap();

        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert!(!session.has_connection());
        assert_eq!(pool.log().count(|c| matches!(c, Call::Pull(2))), 3);
    }

    #[test]
    fn test_blocking_single_and_bookmarks() {
        let pool = FakePool::direct(Behavior::default());
        let mut session = session(&pool, SessionConfig::default());

        let record = session
            .run("RETURN $n AS n", Some(params! { "n" => 1 }))
            .unwrap()
            .single()
            .unwrap();
        assert_eq!(record.get_int("n").unwrap(), 1);
        assert_eq!(
            session.last_bookmarks().unwrap(),
            Bookmarks::from_raw(["res:bm1"])
        );
    }

    #[test]
    fn test_blocking_explicit_transaction() {
        let pool = FakePool::direct(Behavior::default());
        let mut session = session(&pool, SessionConfig::default());

        let tx = session.begin_transaction(TransactionConfig::new()).unwrap();
        tx.run("CREATE (n)", None).unwrap().consume().unwrap();
        tx.commit().unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(!session.has_connection());
        assert_eq!(pool.log().telemetry(), vec![TelemetryApi::Tx]);
    }

    #[test]
    fn test_blocking_transaction_function_retries() {
        let pool = FakePool::direct(Behavior::default());
        let retry = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(0.0);
        let mut session = session(&pool, SessionConfig::new().with_retry(retry));

        let mut attempts = 0;
        let n = session
            .execute_write(|tx| {
                attempts += 1;
                let n = tx.run("RETURN 1 AS n", None)?.single()?.get_int("n")?;
                if attempts < 2 {
                    return Err(DriverError::service_unavailable("leader lost"));
                }
                Ok(n)
            })
            .unwrap();

        assert_eq!((n, attempts), (1, 2));
        assert_eq!(pool.log().telemetry(), vec![TelemetryApi::TxFunc; 2]);
        assert_eq!(pool.log().count(|c| matches!(c, Call::Commit)), 1);
        assert_eq!(pool.log().count(|c| matches!(c, Call::Rollback)), 1);
    }

    #[test]
    fn test_blocking_transaction_function_fatal_error() {
        let pool = FakePool::direct(Behavior::default());
        let mut session = session(&pool, SessionConfig::default());

        let mut attempts = 0;
        let err = session
            .execute_read(|tx| {
                attempts += 1;
                tx.run("RETURN 1", None)?.consume()?;
                Err::<(), _>(DriverError::server("Neo.ClientError.Statement.SyntaxError", "bad"))
            })
            .unwrap_err();

        assert_eq!(attempts, 1);
        assert_eq!(err.code(), Some("Neo.ClientError.Statement.SyntaxError"));
        assert_eq!(pool.log().count(|c| matches!(c, Call::Rollback)), 1);
        assert_eq!(pool.log().count(|c| matches!(c, Call::Commit)), 0);
        assert!(!session.has_connection());
    }

    #[test]
    fn test_blocking_close_on_drop() {
        let pool = FakePool::direct(Behavior::default());
        {
            let mut session = session(&pool, SessionConfig::default());
            let _tx = session.begin_transaction(TransactionConfig::new()).unwrap();
        }
        assert_eq!(pool.log().count(|c| matches!(c, Call::Rollback)), 1);
        assert_eq!(pool.log().pool_names(), vec!["acquire", "release"]);
    }
}
