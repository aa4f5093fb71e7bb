//! Session Management
//!
//! 세션은 한 번에 최대 하나의 연결을 보유하며 자동 커밋 쿼리, 명시적 트랜잭션,
//! 재시도되는 트랜잭션 함수를 그 연결 위에서 순서대로 실행합니다.
//!
//! 연결 슬롯은 `tokio::sync::Mutex`로 보호되어 await를 넘어 보유할 수 있고,
//! 나머지 상태는 `parking_lot` 락으로 짧게만 잠급니다.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::MutexGuard;
use tracing::{debug, info, warn};

use super::auth::{AuthToken, ServerInfo};
use super::bookmarks::{BookmarkManager, Bookmarks};
use super::connection::{AccessMode, BeginRequest, Connection, NotificationFilter, RunRequest};
use super::error::{DriverError, DriverResult};
use super::pool::{AcquireRequest, ConnectionPool, DatabaseCallback, RoutingTableRequest};
use super::result::{EagerResult, QueryResult, ResultCore, ResultOrigin};
use super::retry::{RetryConfig, RetryContext};
use super::telemetry::{TelemetryApi, WorkKind};
use super::transaction::{ManagedTransaction, Transaction, TransactionConfig, TxCore};
use super::types::{extract_reserved, merge_parameters, Params, RunOverrides, Value};

/// 연결 슬롯
type ConnectionSlot = Option<Box<dyn Connection>>;

// ============================================================================
// SessionConfig - 세션 설정
// ============================================================================

/// 세션 설정
///
/// | 필드 | 기본값 |
/// |------|--------|
/// | `default_access_mode` | `Write` |
/// | `fetch_size` | 1000 (`-1`이면 전부) |
/// | `retry` | `RetryConfig::default()` |
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 데이터베이스 이름 (None이면 라우팅 풀에서 홈 데이터베이스로 해석)
    pub database: Option<String>,
    /// 초기 북마크
    pub bookmarks: Bookmarks,
    /// 기본 접근 모드
    pub default_access_mode: AccessMode,
    /// Fetch Size
    pub fetch_size: i64,
    /// 세션 간 북마크 매니저
    pub bookmark_manager: Option<Arc<dyn BookmarkManager>>,
    /// 가장 사용자
    pub impersonated_user: Option<String>,
    /// 세션 수준 인증
    pub auth: Option<AuthToken>,
    /// 연결 획득 타임아웃 (None이면 풀 기본값)
    pub connection_acquisition_timeout: Option<Duration>,
    /// 알림 필터
    pub notification_filter: NotificationFilter,
    /// 트랜잭션 함수 재시도 설정
    pub retry: RetryConfig,
    /// 텔레메트리 전송 끄기
    pub telemetry_disabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database: None,
            bookmarks: Bookmarks::empty(),
            default_access_mode: AccessMode::Write,
            fetch_size: 1000,
            bookmark_manager: None,
            impersonated_user: None,
            auth: None,
            connection_acquisition_timeout: None,
            notification_filter: NotificationFilter::default(),
            retry: RetryConfig::default(),
            telemetry_disabled: false,
        }
    }
}

impl SessionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 빌더 시작
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Fetch Size 설정
    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.fetch_size = size;
        self
    }

    /// 접근 모드 설정
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.default_access_mode = mode;
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Bookmarks) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    /// 북마크 매니저 설정
    pub fn with_bookmark_manager(mut self, manager: Arc<dyn BookmarkManager>) -> Self {
        self.bookmark_manager = Some(manager);
        self
    }

    /// 가장 사용자 설정
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.impersonated_user = Some(user.into());
        self
    }

    /// 세션 인증 설정
    pub fn with_auth(mut self, auth: AuthToken) -> Self {
        self.auth = Some(auth);
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.connection_acquisition_timeout = Some(timeout);
        self
    }

    /// 알림 필터 설정
    pub fn with_notification_filter(mut self, filter: NotificationFilter) -> Self {
        self.notification_filter = filter;
        self
    }

    /// 재시도 설정
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 최대 재시도 시간 설정
    pub fn with_max_transaction_retry_time(mut self, duration: Duration) -> Self {
        self.retry.max_retry_time = duration;
        self
    }

    /// 텔레메트리 끄기
    pub fn with_telemetry_disabled(mut self, disabled: bool) -> Self {
        self.telemetry_disabled = disabled;
        self
    }
}

// ============================================================================
// SessionConfigBuilder - 세션 설정 빌더
// ============================================================================

/// 세션 설정 빌더
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// 새 빌더 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Fetch Size 설정
    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.config.fetch_size = size;
        self
    }

    /// 읽기 모드로 설정
    pub fn with_read_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Read;
        self
    }

    /// 쓰기 모드로 설정
    pub fn with_write_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Write;
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Bookmarks) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// 북마크 추가
    pub fn with_bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.config.bookmarks = &self.config.bookmarks + &Bookmarks::from_raw([bookmark]);
        self
    }

    /// 북마크 매니저 설정
    pub fn with_bookmark_manager(mut self, manager: Arc<dyn BookmarkManager>) -> Self {
        self.config.bookmark_manager = Some(manager);
        self
    }

    /// 가장 사용자 설정
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.config.impersonated_user = Some(user.into());
        self
    }

    /// 세션 인증 설정
    pub fn with_auth(mut self, auth: AuthToken) -> Self {
        self.config.auth = Some(auth);
        self
    }

    /// 알림 필터 설정
    pub fn with_notification_filter(mut self, filter: NotificationFilter) -> Self {
        self.config.notification_filter = filter;
        self
    }

    /// 재시도 설정
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// 빌드
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// Query - 쿼리
// ============================================================================

/// 쿼리
///
/// `metadata`와 `timeout`은 자동 커밋 쿼리에만 적용됩니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// 쿼리 텍스트
    pub text: String,
    /// 파라미터
    pub parameters: Params,
    /// 트랜잭션 메타데이터
    pub metadata: Option<HashMap<String, Value>>,
    /// 트랜잭션 타임아웃
    pub timeout: Option<Duration>,
}

impl Query {
    /// 새 쿼리 생성
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// 파라미터 추가
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 파라미터들 추가
    pub fn with_params(mut self, params: Params) -> Self {
        self.parameters.extend(params);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// 실행 가능한 쿼리로 변환
///
/// 빈 쿼리나 Null은 `InvalidArgument`, 문자열이 아닌 값은 `InvalidType`으로 거부됩니다.
pub trait IntoQuery {
    /// 검증 후 변환
    fn into_query(self) -> DriverResult<Query>;
}

impl IntoQuery for Query {
    fn into_query(self) -> DriverResult<Query> {
        if self.text.trim().is_empty() {
            return Err(DriverError::invalid_argument("Cannot run an empty query"));
        }
        Ok(self)
    }
}

impl IntoQuery for &str {
    fn into_query(self) -> DriverResult<Query> {
        Query::new(self).into_query()
    }
}

impl IntoQuery for String {
    fn into_query(self) -> DriverResult<Query> {
        Query::new(self).into_query()
    }
}

impl IntoQuery for &String {
    fn into_query(self) -> DriverResult<Query> {
        Query::new(self.as_str()).into_query()
    }
}

impl IntoQuery for Value {
    fn into_query(self) -> DriverResult<Query> {
        match self {
            Value::String(text) => Query::new(text).into_query(),
            Value::Null => Err(DriverError::invalid_argument("Cannot run a null query")),
            other => Err(DriverError::invalid_type(format!(
                "Query must be a string, got {}",
                other.type_name()
            ))),
        }
    }
}

impl<Q: IntoQuery> IntoQuery for Option<Q> {
    fn into_query(self) -> DriverResult<Query> {
        match self {
            Some(query) => query.into_query(),
            None => Err(DriverError::invalid_argument("Cannot run a null query")),
        }
    }
}

// ============================================================================
// SessionCore - 세션 공유 상태
// ============================================================================

/// 대상 데이터베이스 해석 상태
#[derive(Debug, Clone, PartialEq)]
enum TargetDatabase {
    Unresolved,
    /// None이면 서버 기본값
    Resolved(Option<String>),
}

#[derive(Debug)]
struct CoreState {
    /// 세션이 직접 받은 북마크 (매니저 북마크는 섞이지 않음)
    bookmarks: Bookmarks,
    database: TargetDatabase,
    /// 연결을 사용 중인 작업 단위 수
    units: usize,
    closed: bool,
}

/// 세션, 결과, 트랜잭션이 공유하는 상태
pub(crate) struct SessionCore {
    pool: Arc<dyn ConnectionPool>,
    config: SessionConfig,
    connection: tokio::sync::Mutex<ConnectionSlot>,
    state: Mutex<CoreState>,
}

/// 보유 중인 연결
pub(crate) fn connected(slot: &mut ConnectionSlot) -> DriverResult<&mut Box<dyn Connection>> {
    slot.as_mut()
        .ok_or_else(|| DriverError::session("The session holds no connection"))
}

impl SessionCore {
    fn new(pool: Arc<dyn ConnectionPool>, config: SessionConfig) -> Self {
        let database = match &config.database {
            Some(db) => TargetDatabase::Resolved(Some(db.clone())),
            None => TargetDatabase::Unresolved,
        };
        Self {
            pool,
            state: Mutex::new(CoreState {
                bookmarks: config.bookmarks.clone(),
                database,
                units: 0,
                closed: false,
            }),
            config,
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn fetch_size(&self) -> i64 {
        if self.config.fetch_size > 0 {
            self.config.fetch_size
        } else {
            -1
        }
    }

    pub(crate) async fn connection(&self) -> MutexGuard<'_, ConnectionSlot> {
        self.connection.lock().await
    }

    fn has_connection(&self) -> bool {
        match self.connection.try_lock() {
            Ok(slot) => slot.is_some(),
            // 다른 작업이 슬롯을 쓰는 중
            Err(_) => true,
        }
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.state.lock().closed {
            return Err(DriverError::session("Session closed"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn bookmarks(&self) -> Bookmarks {
        self.state.lock().bookmarks.clone()
    }

    fn units(&self) -> usize {
        self.state.lock().units
    }

    /// 작업에 실어 보낼 북마크 (세션 북마크 ∪ 매니저 북마크)
    async fn bookmarks_for_work(&self) -> DriverResult<Bookmarks> {
        let own = self.bookmarks();
        match &self.config.bookmark_manager {
            Some(manager) => Ok(own.union(&manager.get_bookmarks().await?)),
            None => Ok(own),
        }
    }

    /// 완료된 작업 단위의 북마크 반영
    pub(crate) async fn update_bookmarks(&self, sent: &Bookmarks, bookmark: &str) -> DriverResult<()> {
        let new = Bookmarks::from_raw([bookmark]);
        self.state.lock().bookmarks = new.clone();
        if let Some(manager) = &self.config.bookmark_manager {
            manager.update_bookmarks(sent, &new).await?;
        }
        Ok(())
    }

    /// 서버가 알려준 데이터베이스 고정 (미해석일 때만)
    pub(crate) fn pin_database(&self, database: Option<&str>) {
        if let Some(db) = database {
            let mut state = self.state.lock();
            if state.database == TargetDatabase::Unresolved {
                debug!(database = db, "Pinned session database from server response");
                state.database = TargetDatabase::Resolved(Some(db.to_string()));
            }
        }
    }

    fn resolved_database(&self) -> Option<Option<String>> {
        match &self.state.lock().database {
            TargetDatabase::Resolved(db) => Some(db.clone()),
            TargetDatabase::Unresolved => None,
        }
    }

    fn begin_unit(&self) {
        self.state.lock().units += 1;
    }

    /// 작업 단위 종료, 마지막이면 연결 반환
    pub(crate) async fn end_unit(&self) {
        let last = {
            let mut state = self.state.lock();
            state.units = state.units.saturating_sub(1);
            state.units == 0
        };
        if last {
            self.release_connection().await;
        }
    }

    /// 실패한 작업 단위 종료 (연결 RESET 후 반환)
    pub(crate) async fn abort_unit(&self) {
        {
            let mut slot = self.connection.lock().await;
            if let Some(conn) = slot.as_mut() {
                if let Err(err) = conn.reset().await {
                    info!(error = %err, "Ignoring failure to reset connection");
                }
            }
        }
        self.end_unit().await;
    }

    async fn release_all(&self) {
        self.state.lock().units = 0;
        self.release_connection().await;
    }

    async fn release_connection(&self) {
        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            self.pool.release(conn).await;
            debug!("Session released connection");
        }
    }

    fn mark_closed(&self) {
        self.state.lock().closed = true;
    }

    fn impersonated_user(&self, overrides: &RunOverrides) -> Option<String> {
        overrides
            .impersonated_user
            .clone()
            .or_else(|| self.config.impersonated_user.clone())
    }

    /// 대상 데이터베이스 해석
    ///
    /// 실행별 지정 > 해석된 값 > (라우팅 풀) 홈 데이터베이스 조회
    async fn resolve_database(&self, overrides: &RunOverrides) -> DriverResult<Option<String>> {
        if let Some(db) = &overrides.database {
            return Ok(Some(db.clone()));
        }
        if let Some(db) = self.resolved_database() {
            return Ok(db);
        }
        if !self.pool.is_routing() {
            return Ok(None);
        }

        let request = RoutingTableRequest {
            database: None,
            impersonated_user: self.impersonated_user(overrides),
            bookmarks: self.bookmarks_for_work().await?,
            auth: self.config.auth.clone(),
            acquisition_timeout: self.config.connection_acquisition_timeout,
        };
        let home = Mutex::new(None::<String>);
        let record_home = |db: String| {
            *home.lock() = Some(db);
        };
        let callback: DatabaseCallback<'_> = &record_home;
        self.pool
            .update_routing_table(request, Some(callback))
            .await?;
        let home = home.into_inner();

        // 실행별 가장 사용자의 홈 데이터베이스는 세션에 기억하지 않음
        if overrides.impersonated_user.is_none() {
            let mut state = self.state.lock();
            if state.database == TargetDatabase::Unresolved {
                state.database = TargetDatabase::Resolved(home.clone());
            }
        }
        debug!(database = ?home, "Resolved home database");
        Ok(home)
    }

    /// 풀에서 연결 획득 후 텔레메트리 전송
    async fn acquire(
        &self,
        mode: AccessMode,
        database: Option<String>,
        impersonated_user: Option<String>,
        api: Option<TelemetryApi>,
    ) -> DriverResult<Box<dyn Connection>> {
        let request = AcquireRequest {
            access_mode: mode,
            database,
            bookmarks: self.bookmarks_for_work().await?,
            impersonated_user,
            auth: self.config.auth.clone(),
            timeout: self.config.connection_acquisition_timeout,
        };
        let mut conn = self.pool.acquire(request).await?;

        if let Some(api) = api.filter(|_| !self.config.telemetry_disabled) {
            if let Err(err) = conn.telemetry(api).await {
                self.pool.release(conn).await;
                return Err(err);
            }
        }
        debug!(mode = %mode, api = ?api, "Session acquired connection");
        Ok(conn)
    }

    /// 작업용 연결 확보 (이미 보유 중이면 재사용), 대상 데이터베이스 반환
    async fn connect(
        &self,
        mode: AccessMode,
        api: TelemetryApi,
        overrides: &RunOverrides,
    ) -> DriverResult<Option<String>> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            return Ok(match &overrides.database {
                Some(db) => Some(db.clone()),
                None => self.resolved_database().flatten(),
            });
        }

        let database = self.resolve_database(overrides).await?;
        let conn = self
            .acquire(mode, database.clone(), self.impersonated_user(overrides), Some(api))
            .await?;
        *slot = Some(conn);
        Ok(database)
    }
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionCore")
            .field("database", &state.database)
            .field("bookmarks", &state.bookmarks)
            .field("units", &state.units)
            .field("closed", &state.closed)
            .finish()
    }
}

// ============================================================================
// Session - 세션
// ============================================================================

/// 데이터베이스 세션
///
/// 한 세션은 한 호출자가 순서대로 사용합니다. 여러 세션은 같은 풀을 공유해
/// 동시에 실행될 수 있습니다.
pub struct Session {
    core: Arc<SessionCore>,
    /// 가장 최근 자동 커밋 결과
    auto_result: Option<Arc<ResultCore>>,
    /// 열린 명시적 트랜잭션
    transaction: Option<Arc<TxCore>>,
}

impl Session {
    /// 새 세션 생성
    pub fn new(pool: Arc<dyn ConnectionPool>, config: SessionConfig) -> Self {
        Self {
            core: Arc::new(SessionCore::new(pool, config)),
            auto_result: None,
            transaction: None,
        }
    }

    /// 세션 설정
    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        !self.core.is_closed()
    }

    /// 연결 보유 여부
    pub fn has_connection(&self) -> bool {
        self.core.has_connection()
    }

    /// 쿼리 실행 (auto-commit)
    ///
    /// `parameters`와 쿼리에 붙은 파라미터가 합쳐지며 같은 키는 쿼리 쪽이 이깁니다.
    /// 예약 키(`timeout`, `imp_user`, `impersonated_user`, `db`, `database`)는
    /// 파라미터에서 빠져 실행 설정으로 쓰입니다.
    pub async fn run(
        &mut self,
        query: impl IntoQuery,
        parameters: Option<Params>,
    ) -> DriverResult<QueryResult> {
        let query = query.into_query()?;
        self.core.check_open()?;
        self.reap_transaction().await?;

        let Query {
            text,
            parameters: keyword,
            metadata,
            timeout,
        } = query;
        let mut parameters = merge_parameters(parameters, keyword);
        let overrides = extract_reserved(&mut parameters)?;

        let request = RunRequest {
            query: text,
            parameters,
            bookmarks: Bookmarks::empty(),
            mode: self.core.config.default_access_mode,
            database: None,
            impersonated_user: self.core.impersonated_user(&overrides),
            notification_filter: self.core.config.notification_filter.clone(),
            tx_metadata: metadata,
            tx_timeout: overrides.timeout.or(timeout),
        };

        self.core.begin_unit();
        let core = self.start_auto_commit(request, &overrides).await?;
        self.auto_result = Some(Arc::clone(&core));
        Ok(QueryResult::new(core))
    }

    async fn start_auto_commit(
        &mut self,
        mut request: RunRequest,
        overrides: &RunOverrides,
    ) -> DriverResult<Arc<ResultCore>> {
        // 이전 결과는 버퍼에 모두 받아 둔 뒤 같은 연결을 재사용
        if let Some(previous) = self.auto_result.take() {
            if let Err(err) = previous.buffer_all().await {
                self.core.end_unit().await;
                return Err(err);
            }
        }

        let prepared = async {
            let database = self
                .core
                .connect(request.mode, WorkKind::AutoCommit.classify(), overrides)
                .await?;
            let bookmarks = self.core.bookmarks_for_work().await?;
            Ok::<_, DriverError>((database, bookmarks))
        }
        .await;
        let (database, bookmarks) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.core.end_unit().await;
                return Err(err);
            }
        };

        request.database = database;
        request.bookmarks = bookmarks.clone();
        let origin = ResultOrigin::AutoCommit {
            bookmarks,
            pin_database: overrides.database.is_none(),
        };
        ResultCore::start(&self.core, request, origin).await
    }

    /// 명시적 트랜잭션 시작
    ///
    /// 이미 열린 트랜잭션이 있거나 자동 커밋 결과가 아직 스트리밍 중이면 실패합니다.
    pub async fn begin_transaction(&mut self, config: TransactionConfig) -> DriverResult<Transaction> {
        self.core.check_open()?;
        self.reap_transaction().await?;
        if self.core.units() > 0 {
            return Err(DriverError::session(
                "Cannot begin a transaction while auto-commit results are pending; consume them first",
            ));
        }

        let mode = self.core.config.default_access_mode;
        let tx = self
            .open_transaction(mode, WorkKind::ExplicitTransaction.classify(), &config)
            .await?;
        self.transaction = Some(Arc::clone(&tx));
        Ok(Transaction::new(tx))
    }

    pub(crate) async fn open_transaction(
        &self,
        mode: AccessMode,
        api: TelemetryApi,
        config: &TransactionConfig,
    ) -> DriverResult<Arc<TxCore>> {
        self.core.begin_unit();
        let overrides = RunOverrides::default();

        let prepared = async {
            let database = self.core.connect(mode, api, &overrides).await?;
            let bookmarks = self.core.bookmarks_for_work().await?;
            Ok::<_, DriverError>((database, bookmarks))
        }
        .await;
        let (database, bookmarks) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.core.end_unit().await;
                return Err(err);
            }
        };

        let request = BeginRequest {
            bookmarks: bookmarks.clone(),
            mode,
            database,
            impersonated_user: self.core.config.impersonated_user.clone(),
            notification_filter: self.core.config.notification_filter.clone(),
            tx_metadata: config.metadata_for_request(),
            tx_timeout: config.timeout,
        };
        let begun = {
            let mut slot = self.core.connection().await;
            match connected(&mut slot) {
                Ok(conn) => conn.begin(request).await,
                Err(err) => Err(err),
            }
        };
        match begun {
            Ok(response) => {
                self.core.pin_database(response.database.as_deref());
                Ok(TxCore::new(Arc::clone(&self.core), bookmarks))
            }
            Err(err) => {
                self.core.abort_unit().await;
                Err(err)
            }
        }
    }

    /// 끝났거나 버려진 명시적 트랜잭션 정리
    ///
    /// 아직 사용자가 들고 있는 열린 트랜잭션이 있으면 실패합니다.
    async fn reap_transaction(&mut self) -> DriverResult<()> {
        let Some(tx) = self.transaction.take() else {
            return Ok(());
        };
        if tx.state().is_terminated() {
            return Ok(());
        }
        if Arc::strong_count(&tx) == 1 {
            warn!("Rolling back a transaction that was dropped while still open");
            tx.close_quietly().await;
            return Ok(());
        }
        self.transaction = Some(tx);
        Err(DriverError::session(
            "An explicit transaction is open; commit, roll back or close it first",
        ))
    }

    /// 트랜잭션 함수 실행 전 공통 점검
    pub(crate) async fn prepare_transaction_work(&mut self) -> DriverResult<()> {
        self.core.check_open()?;
        self.reap_transaction().await?;
        if let Some(previous) = self.auto_result.take() {
            previous.buffer_all().await?;
        }
        Ok(())
    }

    /// 읽기 트랜잭션 함수
    ///
    /// 재시도 가능한 실패가 나면 `RetryConfig`에 따라 `work`를 다시 호출합니다.
    pub async fn execute_read<F, Fut, T>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(ManagedTransaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_read_with_config(TransactionConfig::default(), work)
            .await
    }

    /// 설정을 지정한 읽기 트랜잭션 함수
    pub async fn execute_read_with_config<F, Fut, T>(
        &mut self,
        config: TransactionConfig,
        work: F,
    ) -> DriverResult<T>
    where
        F: FnMut(ManagedTransaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let api = WorkKind::TransactionFunction.classify();
        self.run_transaction(AccessMode::Read, api, config, work)
            .await
    }

    /// 쓰기 트랜잭션 함수
    pub async fn execute_write<F, Fut, T>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(ManagedTransaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_write_with_config(TransactionConfig::default(), work)
            .await
    }

    /// 설정을 지정한 쓰기 트랜잭션 함수
    pub async fn execute_write_with_config<F, Fut, T>(
        &mut self,
        config: TransactionConfig,
        work: F,
    ) -> DriverResult<T>
    where
        F: FnMut(ManagedTransaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let api = WorkKind::TransactionFunction.classify();
        self.run_transaction(AccessMode::Write, api, config, work)
            .await
    }

    /// 읽기 트랜잭션 함수 (이전 이름)
    #[deprecated(note = "read_transaction has been renamed to execute_read")]
    pub async fn read_transaction<F, Fut, T>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(ManagedTransaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        deprecation_warning("read");
        self.execute_read(work).await
    }

    /// 쓰기 트랜잭션 함수 (이전 이름)
    #[deprecated(note = "write_transaction has been renamed to execute_write")]
    pub async fn write_transaction<F, Fut, T>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(ManagedTransaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        deprecation_warning("write");
        self.execute_write(work).await
    }

    /// 재시도 루프
    ///
    /// 시도마다 새 연결과 트랜잭션을 열고, 정상 반환이면 커밋합니다.
    pub(crate) async fn run_transaction<F, Fut, T>(
        &mut self,
        mode: AccessMode,
        api: TelemetryApi,
        config: TransactionConfig,
        mut work: F,
    ) -> DriverResult<T>
    where
        F: FnMut(ManagedTransaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.prepare_transaction_work().await?;
        let mut retry = RetryContext::new(&self.core.config.retry);

        loop {
            let outcome = match self.open_transaction(mode, api, &config).await {
                Ok(tx) => {
                    let outcome = work(ManagedTransaction::new(Arc::clone(&tx))).await;
                    tx.settle(outcome).await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(failure) => tokio::time::sleep(retry.backoff(failure)?).await,
            }
        }
    }

    /// 쿼리를 트랜잭션 함수로 실행하고 결과를 모두 읽음
    ///
    /// 드라이버 수준 API로 분류되며 실패 시 재시도됩니다.
    /// 쿼리의 메타데이터와 타임아웃은 트랜잭션 설정으로 옮겨집니다.
    pub async fn execute_query(
        &mut self,
        query: impl IntoQuery,
        parameters: Option<Params>,
        mode: AccessMode,
    ) -> DriverResult<EagerResult> {
        let mut query = query.into_query()?;
        let config = TransactionConfig {
            timeout: query.timeout.take(),
            metadata: query.metadata.take().unwrap_or_default(),
        };
        let api = WorkKind::Internal.classify();

        self.run_transaction(mode, api, config, |tx| {
            let query = query.clone();
            let parameters = parameters.clone();
            async move {
                let mut result = tx.run(query, parameters).await?;
                let keys = result.keys().to_vec();
                let records = result.collect().await?;
                let summary = result.consume().await?;
                Ok(EagerResult {
                    keys,
                    records,
                    summary,
                })
            }
        })
        .await
    }

    /// 세션이 만든 북마크
    ///
    /// 대기 중인 자동 커밋 결과를 먼저 끝까지 받습니다. 북마크 매니저에서 가져온
    /// 북마크는 포함하지 않습니다.
    pub async fn last_bookmarks(&mut self) -> DriverResult<Bookmarks> {
        if let Some(result) = &self.auto_result {
            result.buffer_all().await?;
        }
        Ok(self.core.bookmarks())
    }

    /// 마지막 북마크 하나 (이전 API)
    #[deprecated(note = "last_bookmark has been deprecated in favor of last_bookmarks")]
    pub async fn last_bookmark(&mut self) -> DriverResult<Option<String>> {
        warn!(
            target: "bolt_session::deprecation",
            "last_bookmark has been deprecated in favor of last_bookmarks"
        );
        let bookmarks = self.last_bookmarks().await?;
        Ok(bookmarks.latest().map(str::to_string))
    }

    /// 서버 정보
    ///
    /// 연결을 보유 중이면 그 연결의 정보를, 아니면 잠시 연결을 빌려 확인합니다.
    pub async fn server_info(&mut self) -> DriverResult<ServerInfo> {
        self.core.check_open()?;
        {
            let slot = self.core.connection().await;
            if let Some(conn) = slot.as_ref() {
                return Ok(conn.server_info());
            }
        }

        let overrides = RunOverrides::default();
        let database = self.core.resolve_database(&overrides).await?;
        let conn = self
            .core
            .acquire(
                AccessMode::Read,
                database,
                self.core.impersonated_user(&overrides),
                None,
            )
            .await?;
        let info = conn.server_info();
        self.core.pool.release(conn).await;
        Ok(info)
    }

    /// 세션 닫기
    ///
    /// 열린 트랜잭션은 롤백하고 대기 중인 결과는 버린 뒤 연결을 반환합니다.
    /// 정리 중 실패는 로그만 남깁니다.
    pub async fn close(&mut self) {
        if self.core.is_closed() {
            return;
        }
        if let Some(tx) = self.transaction.take() {
            tx.close_quietly().await;
        }
        if let Some(result) = self.auto_result.take() {
            if let Err(err) = result.consume().await {
                info!(error = %err, "Ignoring failure to consume pending result on close");
            }
        }
        self.core.release_all().await;
        self.core.mark_closed();
        debug!("Session closed");
    }

    /// 범위 실행: `f`가 끝나면 오류 여부와 관계없이 세션을 닫음
    pub async fn scoped<F, T>(mut self, f: F) -> DriverResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, DriverResult<T>>,
        T: 'static,
    {
        let outcome = f(&mut self).await;
        self.close().await;
        outcome
    }
}

fn deprecation_warning(mode: &str) {
    warn!(
        target: "bolt_session::deprecation",
        "{}_transaction has been renamed to execute_{}", mode, mode
    );
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("core", &self.core)
            .field("transaction_open", &self.transaction.is_some())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.core.is_closed() {
            return;
        }
        let core = Arc::clone(&self.core);
        let tx = self.transaction.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(tx) = tx {
                        tx.close_quietly().await;
                    }
                    core.release_all().await;
                    core.mark_closed();
                });
            }
            Err(_) => warn!("Session dropped outside a runtime without being closed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
