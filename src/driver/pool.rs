//! Connection Pool
//!
//! 세션이 의존하는 연결 풀 인터페이스와 단일 서버용 DirectPool

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::auth::AuthToken;
use super::bookmarks::Bookmarks;
use super::connection::{AccessMode, Connection};
use super::error::{DriverError, DriverResult};

// ============================================================================
// Requests
// ============================================================================

/// 연결 획득 요청
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquireRequest {
    /// 접근 모드
    pub access_mode: AccessMode,
    /// 대상 데이터베이스
    pub database: Option<String>,
    /// 라우팅 테이블 갱신에 쓸 북마크
    pub bookmarks: Bookmarks,
    /// 가장 사용자
    pub impersonated_user: Option<String>,
    /// 세션 수준 인증
    pub auth: Option<AuthToken>,
    /// 획득 타임아웃 (None이면 풀 기본값)
    pub timeout: Option<Duration>,
}

/// 라우팅 테이블 갱신 요청
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTableRequest {
    /// 대상 데이터베이스 (None이면 홈 데이터베이스)
    pub database: Option<String>,
    /// 가장 사용자
    pub impersonated_user: Option<String>,
    /// 전송 북마크
    pub bookmarks: Bookmarks,
    /// 세션 수준 인증
    pub auth: Option<AuthToken>,
    /// 획득 타임아웃
    pub acquisition_timeout: Option<Duration>,
}

/// 홈 데이터베이스 이름을 받는 콜백
pub type DatabaseCallback<'a> = &'a (dyn Fn(String) + Send + Sync);

// ============================================================================
// ConnectionPool trait
// ============================================================================

/// 연결 풀
///
/// 체크아웃/체크인 동기화는 풀 구현체가 책임집니다.
#[async_trait]
pub trait ConnectionPool: Send + Sync + Debug {
    /// 연결 획득
    ///
    /// 제한 시간 안에 연결을 얻지 못하면 `DriverError::Timeout`을 반환합니다.
    async fn acquire(&self, request: AcquireRequest) -> DriverResult<Box<dyn Connection>>;

    /// 연결 반환 (항상 성공)
    async fn release(&self, connection: Box<dyn Connection>);

    /// 라우팅 풀 여부
    fn is_routing(&self) -> bool {
        false
    }

    /// 라우팅 테이블 갱신
    ///
    /// 홈 데이터베이스를 알아내면 반환 전에 `database_callback`을 호출합니다.
    async fn update_routing_table(
        &self,
        request: RoutingTableRequest,
        database_callback: Option<DatabaseCallback<'_>>,
    ) -> DriverResult<()> {
        let _ = (request, database_callback);
        Err(DriverError::configuration(
            "Routing table updates require a routing pool",
        ))
    }
}

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// DirectPool 설정
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `max_size` | 100 | 최대 연결 수 |
/// | `max_idle` | 100 | 보관할 최대 유휴 연결 수 |
/// | `acquisition_timeout` | 60초 | 연결 획득 타임아웃 |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 최대 연결 수
    pub max_size: usize,
    /// 최대 유휴 연결 수
    pub max_idle: usize,
    /// 연결 획득 타임아웃
    pub acquisition_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_idle: 100,
            acquisition_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// 빌더 패턴으로 풀 설정 생성
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// 풀 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 최대 연결 수 설정
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// 최대 유휴 연결 수 설정
    pub fn max_idle(mut self, size: usize) -> Self {
        self.config.max_idle = size;
        self
    }

    /// 획득 타임아웃 설정
    pub fn acquisition_timeout(mut self, duration: Duration) -> Self {
        self.config.acquisition_timeout = duration;
        self
    }

    /// 설정 빌드
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// PoolMetrics - 풀 메트릭
// ============================================================================

/// 풀 메트릭
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// 유휴 연결 수
    pub idle: usize,
    /// 사용 중인 연결 수
    pub in_use: usize,
    /// 총 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성 횟수
    pub total_created: u64,
    /// 총 닫힌 연결 수
    pub total_closed: u64,
    /// 총 타임아웃 횟수
    pub total_timeouts: u64,
}

// ============================================================================
// DirectPool - 단일 서버 풀
// ============================================================================

/// 새 연결을 여는 팩토리
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// 새 연결 생성 (핸드셰이크와 기본 인증 포함)
    async fn connect(&self) -> DriverResult<Box<dyn Connection>>;
}

/// 단일 서버 연결 풀
///
/// 세마포어로 동시 연결 수를 제한하고 유휴 연결을 재사용합니다.
#[derive(Debug)]
pub struct DirectPool<C: Connector> {
    connector: C,
    config: PoolConfig,
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    semaphore: Semaphore,
    in_use: AtomicUsize,
    total_acquisitions: AtomicU64,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    total_timeouts: AtomicU64,
    closed: AtomicBool,
}

impl<C: Connector> DirectPool<C> {
    /// 새 풀 생성
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let semaphore = Semaphore::new(config.max_size);
        Self {
            connector,
            config,
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            in_use: AtomicUsize::new(0),
            total_acquisitions: AtomicU64::new(0),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 풀 설정
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            idle: self.idle.lock().len(),
            in_use: self.in_use.load(Ordering::Relaxed),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }

    /// 풀 닫기
    ///
    /// 대기 중인 획득은 실패하고 유휴 연결은 버려집니다.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.semaphore.close();
        let drained = {
            let mut idle = self.idle.lock();
            let n = idle.len();
            idle.clear();
            n
        };
        self.total_closed.fetch_add(drained as u64, Ordering::Relaxed);
        debug!(drained, "Connection pool closed");
    }

    /// 닫힘 여부
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_idle(&self) -> Option<Box<dyn Connection>> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop_front() {
            if conn.is_healthy() {
                return Some(conn);
            }
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
        None
    }
}

#[async_trait]
impl<C: Connector> ConnectionPool for DirectPool<C> {
    async fn acquire(&self, request: AcquireRequest) -> DriverResult<Box<dyn Connection>> {
        if self.is_closed() {
            return Err(DriverError::pool("Pool is closed"));
        }

        let timeout = request.timeout.unwrap_or(self.config.acquisition_timeout);
        let permit = match tokio::time::timeout(timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DriverError::pool("Pool is closed")),
            Err(_) => {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(DriverError::timeout(format!(
                    "Failed to obtain a connection from the pool within {:?}",
                    timeout
                )));
            }
        };

        let mut conn = match self.take_idle() {
            Some(conn) => conn,
            None => {
                let conn = self.connector.connect().await?;
                self.total_created.fetch_add(1, Ordering::Relaxed);
                conn
            }
        };
        conn.re_auth(request.auth.as_ref()).await?;

        // 반환 시 add_permits로 되돌림
        permit.forget();
        self.in_use.fetch_add(1, Ordering::SeqCst);
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        debug!(mode = %request.access_mode, database = ?request.database, "Connection acquired");
        Ok(conn)
    }

    async fn release(&self, connection: Box<dyn Connection>) {
        let released = self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !released {
            warn!("Ignoring release of a connection not handed out by this pool");
            return;
        }
        self.semaphore.add_permits(1);

        let mut idle = self.idle.lock();
        if self.is_closed() || !connection.is_healthy() || idle.len() >= self.config.max_idle {
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        idle.push_back(connection);
        debug!(idle = idle.len(), "Connection released");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{Behavior, Call, CallLog, FakeConnection};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct FakeConnector {
        log: CallLog,
        behavior: Arc<Behavior>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> DriverResult<Box<dyn Connection>> {
            Ok(Box::new(FakeConnection::new(
                self.log.clone(),
                Arc::clone(&self.behavior),
            )))
        }
    }

    fn pool(max_size: usize) -> DirectPool<FakeConnector> {
        let connector = FakeConnector {
            log: CallLog::default(),
            behavior: Arc::new(Behavior::default()),
        };
        DirectPool::new(
            connector,
            PoolConfig::builder()
                .max_size(max_size)
                .acquisition_timeout(Duration::from_secs(5))
                .build(),
        )
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::builder()
            .max_size(10)
            .max_idle(2)
            .acquisition_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.max_idle, 2);
        assert_eq!(config.acquisition_timeout, Duration::from_secs(3));
        assert_eq!(PoolConfig::default().max_size, 100);
    }

    #[tokio::test]
    async fn test_acquire_and_reuse() {
        let pool = pool(2);

        let conn = pool.acquire(AcquireRequest::default()).await.unwrap();
        assert_eq!(pool.metrics().in_use, 1);
        pool.release(conn).await;

        let conn = pool.acquire(AcquireRequest::default()).await.unwrap();
        pool.release(conn).await;

        let metrics = pool.metrics();
        assert_eq!(metrics.total_created, 1);
        assert_eq!(metrics.total_acquisitions, 2);
        assert_eq!(metrics.in_use, 0);
        assert_eq!(metrics.idle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_when_exhausted() {
        let pool = pool(1);
        let held = pool.acquire(AcquireRequest::default()).await.unwrap();

        let request = AcquireRequest {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let err = pool.acquire(request).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
        assert!(!err.is_retryable());
        assert_eq!(pool.metrics().total_timeouts, 1);

        pool.release(held).await;
        let conn = pool.acquire(AcquireRequest::default()).await.unwrap();
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_release_foreign_connection_is_ignored() {
        let pool = pool(1);
        let stranger: Box<dyn Connection> = Box::new(FakeConnection::new(
            CallLog::default(),
            Arc::new(Behavior::default()),
        ));
        pool.release(stranger).await;

        let metrics = pool.metrics();
        assert_eq!(metrics.idle, 0);
        assert_eq!(metrics.in_use, 0);
    }

    #[tokio::test]
    async fn test_session_auth_applied_on_acquire() {
        let pool = pool(1);
        let request = AcquireRequest {
            auth: Some(AuthToken::basic("alice", "pw")),
            ..Default::default()
        };
        let conn = pool.acquire(request).await.unwrap();
        pool.release(conn).await;

        // 재사용 시 풀 기본 자격 증명으로 복귀
        let conn = pool.acquire(AcquireRequest::default()).await.unwrap();
        pool.release(conn).await;

        let auths: Vec<_> = pool
            .connector
            .log
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ReAuth(auth) => Some(auth),
                _ => None,
            })
            .collect();
        assert_eq!(auths, vec![Some(AuthToken::basic("alice", "pw")), None]);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let pool = pool(1);
        let conn = pool.acquire(AcquireRequest::default()).await.unwrap();
        pool.close();
        assert!(matches!(
            pool.acquire(AcquireRequest::default()).await,
            Err(DriverError::Pool(_))
        ));

        // 닫힌 뒤 반환된 연결은 버려짐
        pool.release(conn).await;
        assert_eq!(pool.metrics().idle, 0);
        assert_eq!(pool.metrics().total_closed, 1);
    }

    #[tokio::test]
    async fn test_direct_pool_is_not_routing() {
        let pool = pool(1);
        assert!(!pool.is_routing());
        let err = pool
            .update_routing_table(RoutingTableRequest::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }
}
