//! Transaction API
//!
//! 명시적 트랜잭션과 트랜잭션 함수에 넘겨지는 관리 트랜잭션.
//! 두 타입은 같은 내부 상태(`TxCore`)를 공유하고 노출하는 메서드만 다릅니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::bookmarks::Bookmarks;
use super::connection::RunRequest;
use super::error::{DriverError, DriverResult};
use super::result::{QueryResult, ResultCore, ResultOrigin};
use super::session::{connected, IntoQuery, SessionCore};
use super::types::{merge_parameters, Params, Value};

// ============================================================================
// TransactionConfig - 트랜잭션 설정
// ============================================================================

/// 트랜잭션 설정
///
/// BEGIN 메시지에 실려 서버로 전달됩니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionConfig {
    /// 타임아웃
    pub timeout: Option<Duration>,
    /// 메타데이터
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn metadata_for_request(&self) -> Option<HashMap<String, Value>> {
        if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata.clone())
        }
    }
}

// ============================================================================
// TransactionState - 트랜잭션 상태
// ============================================================================

/// 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 활성 상태
    Active,
    /// 쿼리 실패, 롤백만 가능
    Failed,
    /// 커밋됨
    Committed,
    /// 롤백됨
    RolledBack,
    /// 커밋 실패 등으로 강제 종료됨
    Closed,
}

impl TransactionState {
    /// 완료 상태 여부
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Closed)
    }
}

// ============================================================================
// TxCore - 트랜잭션 내부 상태
// ============================================================================

struct TxInner {
    state: TransactionState,
    results: Vec<Arc<ResultCore>>,
}

pub(crate) struct TxCore {
    session: Arc<SessionCore>,
    /// BEGIN에 실어 보낸 북마크
    bookmarks: Bookmarks,
    inner: Mutex<TxInner>,
}

impl TxCore {
    pub(crate) fn new(session: Arc<SessionCore>, bookmarks: Bookmarks) -> Arc<Self> {
        Arc::new(Self {
            session,
            bookmarks,
            inner: Mutex::new(TxInner {
                state: TransactionState::Active,
                results: Vec::new(),
            }),
        })
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// 쿼리 실패 표시
    pub(crate) fn mark_failed(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TransactionState::Active {
            inner.state = TransactionState::Failed;
        }
    }

    fn set_state(&self, state: TransactionState) {
        self.inner.lock().state = state;
    }

    fn ensure_active(&self, action: &str) -> DriverResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            TransactionState::Failed => Err(DriverError::transaction(format!(
                "Cannot {} in this transaction, because it has been rolled back either because of an error or explicit termination",
                action
            ))),
            _ => Err(DriverError::transaction("Transaction closed")),
        }
    }

    pub(crate) async fn run(
        self: &Arc<Self>,
        query: impl IntoQuery,
        parameters: Option<Params>,
    ) -> DriverResult<QueryResult> {
        let query = query.into_query()?;
        self.ensure_active("run a query")?;
        if query.metadata.is_some() || query.timeout.is_some() {
            return Err(DriverError::invalid_argument(
                "Query metadata and timeout only apply to auto-commit queries; use TransactionConfig for transactions",
            ));
        }

        // 데이터베이스/사용자/타임아웃은 BEGIN에서 정해지므로 예약 키도 일반 파라미터로 전달
        let parameters = merge_parameters(parameters, query.parameters);

        let previous = self.inner.lock().results.last().cloned();
        if let Some(previous) = previous {
            previous.buffer_all().await?;
        }

        let request = RunRequest {
            query: query.text,
            parameters,
            ..RunRequest::default()
        };
        let core = ResultCore::start(
            &self.session,
            request,
            ResultOrigin::Transaction(Arc::downgrade(self)),
        )
        .await?;
        self.inner.lock().results.push(Arc::clone(&core));
        Ok(QueryResult::new(core))
    }

    fn take_results(&self) -> Vec<Arc<ResultCore>> {
        std::mem::take(&mut self.inner.lock().results)
    }

    pub(crate) async fn commit(&self) -> DriverResult<()> {
        self.ensure_active("commit")?;

        for result in self.take_results() {
            if let Err(err) = result.end_of_transaction(true).await {
                self.set_state(TransactionState::Closed);
                self.session.abort_unit().await;
                return Err(err);
            }
        }

        let committed = {
            let mut slot = self.session.connection().await;
            match connected(&mut slot) {
                Ok(conn) => conn.commit().await,
                Err(err) => Err(err),
            }
        };
        match committed {
            Ok(bookmark) => {
                self.set_state(TransactionState::Committed);
                let updated = match bookmark.as_deref() {
                    Some(bookmark) => self.session.update_bookmarks(&self.bookmarks, bookmark).await,
                    None => Ok(()),
                };
                self.session.end_unit().await;
                updated
            }
            Err(err) => {
                self.set_state(TransactionState::Closed);
                self.session.abort_unit().await;
                Err(err)
            }
        }
    }

    pub(crate) async fn rollback(&self) -> DriverResult<()> {
        let state = self.state();
        if state.is_terminated() {
            return Err(DriverError::transaction("Transaction closed"));
        }

        for result in self.take_results() {
            // 롤백에서는 DISCARD를 보내지 않으므로 실패하지 않음
            let _ = result.end_of_transaction(false).await;
        }
        self.set_state(TransactionState::RolledBack);

        if state == TransactionState::Failed {
            // 서버는 이미 트랜잭션을 끝냄
            self.session.abort_unit().await;
            return Ok(());
        }

        let rolled_back = {
            let mut slot = self.session.connection().await;
            match connected(&mut slot) {
                Ok(conn) => conn.rollback().await,
                Err(err) => Err(err),
            }
        };
        match rolled_back {
            Ok(()) => {
                self.session.end_unit().await;
                Ok(())
            }
            Err(err) => {
                self.session.abort_unit().await;
                Err(err)
            }
        }
    }

    /// 닫기 (이미 끝났으면 아무것도 하지 않음)
    pub(crate) async fn close(&self) -> DriverResult<()> {
        if self.state().is_terminated() {
            return Ok(());
        }
        self.rollback().await
    }

    /// 닫기, 실패는 로그만 남김
    pub(crate) async fn close_quietly(&self) {
        if let Err(err) = self.close().await {
            info!(error = %err, "Ignoring failure to roll back transaction");
        }
    }

    /// 트랜잭션 함수 시도 마무리: 성공이면 커밋, 실패면 롤백
    pub(crate) async fn settle<T>(&self, outcome: DriverResult<T>) -> DriverResult<T> {
        let committed = match outcome {
            Ok(value) => self.commit().await.map(|()| value),
            Err(err) => Err(err),
        };
        if committed.is_err() {
            self.close_quietly().await;
        }
        committed
    }
}

// ============================================================================
// Transaction - 명시적 트랜잭션
// ============================================================================

/// 명시적 트랜잭션
///
/// `Session::begin_transaction`으로 얻습니다. 커밋이나 롤백 없이 버려지면
/// 세션이 다음 작업 때 롤백하고 연결을 반환합니다.
pub struct Transaction {
    core: Arc<TxCore>,
}

impl Transaction {
    pub(crate) fn new(core: Arc<TxCore>) -> Self {
        Self { core }
    }

    /// 쿼리 실행
    pub async fn run(
        &self,
        query: impl IntoQuery,
        parameters: Option<Params>,
    ) -> DriverResult<QueryResult> {
        self.core.run(query, parameters).await
    }

    /// 커밋
    pub async fn commit(&self) -> DriverResult<()> {
        self.core.commit().await
    }

    /// 롤백
    pub async fn rollback(&self) -> DriverResult<()> {
        self.core.rollback().await
    }

    /// 트랜잭션 닫기 (커밋/롤백 전이면 롤백)
    pub async fn close(&self) -> DriverResult<()> {
        self.core.close().await
    }

    /// 현재 상태
    pub fn state(&self) -> TransactionState {
        self.core.state()
    }

    /// 열림 여부
    pub fn is_open(&self) -> bool {
        !self.core.state().is_terminated()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("Transaction dropped without commit or rollback; the session will roll it back");
        }
    }
}

// ============================================================================
// ManagedTransaction - 트랜잭션 함수용
// ============================================================================

/// 트랜잭션 함수에 전달되는 트랜잭션
///
/// 커밋과 롤백은 세션의 재시도 루프가 담당하므로 `run`만 노출합니다.
#[derive(Clone)]
pub struct ManagedTransaction {
    core: Arc<TxCore>,
}

impl ManagedTransaction {
    pub(crate) fn new(core: Arc<TxCore>) -> Self {
        Self { core }
    }

    /// 쿼리 실행
    pub async fn run(
        &self,
        query: impl IntoQuery,
        parameters: Option<Params>,
    ) -> DriverResult<QueryResult> {
        self.core.run(query, parameters).await
    }

    /// 열림 여부
    pub fn is_open(&self) -> bool {
        !self.core.state().is_terminated()
    }
}

impl fmt::Debug for ManagedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedTransaction")
            .field("state", &self.core.state())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
