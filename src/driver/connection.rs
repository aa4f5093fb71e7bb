//! Connection - 프로토콜 채널 인터페이스
//!
//! 세션 코어가 의존하는 단일 연결의 요청/응답 계약.
//! 메시지 인코딩과 소켓 전송은 구현체의 몫입니다.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;

use super::auth::{AuthToken, ServerInfo};
use super::bookmarks::Bookmarks;
use super::error::{DriverError, DriverResult};
use super::telemetry::TelemetryApi;
use super::types::{Params, Value};

// ============================================================================
// AccessMode - 접근 모드
// ============================================================================

/// 접근 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// 읽기
    Read,
    /// 쓰기
    #[default]
    Write,
}

impl AccessMode {
    /// 프로토콜 표기 ("r" / "w")
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

// ============================================================================
// NotificationFilter - 알림 필터
// ============================================================================

/// 서버 알림 최소 심각도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationMinSeverity {
    /// 알림 끔
    Off,
    /// WARNING 이상
    Warning,
    /// INFORMATION 이상
    Information,
}

/// 서버 알림 분류
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationClassification {
    /// HINT
    Hint,
    /// UNRECOGNIZED
    Unrecognized,
    /// UNSUPPORTED
    Unsupported,
    /// PERFORMANCE
    Performance,
    /// DEPRECATION
    Deprecation,
    /// SECURITY
    Security,
    /// TOPOLOGY
    Topology,
    /// SCHEMA
    Schema,
    /// GENERIC
    Generic,
    /// 알려지지 않은 분류 (원문 그대로 전달)
    Other(String),
}

/// 알림 필터 설정
///
/// 세션은 값을 해석하지 않고 그대로 연결에 전달합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    /// 최소 심각도 (None이면 서버 기본값)
    pub minimum_severity: Option<NotificationMinSeverity>,
    /// 비활성화할 분류 (None이면 서버 기본값)
    pub disabled_classifications: Option<Vec<NotificationClassification>>,
}

impl NotificationFilter {
    /// 최소 심각도 설정
    pub fn with_minimum_severity(mut self, severity: NotificationMinSeverity) -> Self {
        self.minimum_severity = Some(severity);
        self
    }

    /// 비활성화 분류 설정
    pub fn with_disabled_classifications(
        mut self,
        classifications: Vec<NotificationClassification>,
    ) -> Self {
        self.disabled_classifications = Some(classifications);
        self
    }
}

// ============================================================================
// Requests / Responses
// ============================================================================

/// RUN 요청
///
/// 트랜잭션 안의 RUN은 쿼리와 파라미터만 의미가 있고 나머지는 기본값입니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    /// 쿼리 문자열
    pub query: String,
    /// 쿼리 파라미터
    pub parameters: Params,
    /// 전송 북마크
    pub bookmarks: Bookmarks,
    /// 접근 모드
    pub mode: AccessMode,
    /// 대상 데이터베이스
    pub database: Option<String>,
    /// 가장 사용자
    pub impersonated_user: Option<String>,
    /// 알림 필터
    pub notification_filter: NotificationFilter,
    /// 트랜잭션 메타데이터
    pub tx_metadata: Option<HashMap<String, Value>>,
    /// 트랜잭션 타임아웃
    pub tx_timeout: Option<Duration>,
}

/// BEGIN 요청
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeginRequest {
    /// 전송 북마크
    pub bookmarks: Bookmarks,
    /// 접근 모드
    pub mode: AccessMode,
    /// 대상 데이터베이스
    pub database: Option<String>,
    /// 가장 사용자
    pub impersonated_user: Option<String>,
    /// 알림 필터
    pub notification_filter: NotificationFilter,
    /// 트랜잭션 메타데이터
    pub tx_metadata: Option<HashMap<String, Value>>,
    /// 트랜잭션 타임아웃
    pub tx_timeout: Option<Duration>,
}

/// RUN 성공 응답
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResponse {
    /// 컬럼 키
    pub keys: Vec<String>,
    /// 서버가 알려준 실행 데이터베이스
    pub database: Option<String>,
    /// 나머지 메타데이터 (t_first, qid 등)
    pub metadata: HashMap<String, Value>,
}

/// PULL / DISCARD 응답
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResponse {
    /// 레코드 값들
    pub records: Vec<Vec<Value>>,
    /// 남은 레코드 존재 여부
    pub has_more: bool,
    /// 스트림 종료 메타데이터 (bookmark, type, stats, notifications, t_last, db)
    pub metadata: HashMap<String, Value>,
}

/// BEGIN 성공 응답
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeginResponse {
    /// 서버가 알려준 실행 데이터베이스
    pub database: Option<String>,
}

// ============================================================================
// Connection trait
// ============================================================================

/// 단일 프로토콜 연결
///
/// 모든 비동기 메서드는 네트워크 I/O로 대기할 수 있습니다.
#[async_trait]
pub trait Connection: Send + Debug {
    /// 연결된 서버 정보
    fn server_info(&self) -> ServerInfo;

    /// 재사용 가능한 상태인지 여부
    fn is_healthy(&self) -> bool {
        true
    }

    /// 세션 수준 인증 전환
    ///
    /// `None`이면 풀 기본 자격 증명으로 되돌립니다.
    async fn re_auth(&mut self, auth: Option<&AuthToken>) -> DriverResult<()> {
        match auth {
            None => Ok(()),
            Some(_) => Err(DriverError::configuration(
                "Session level authentication is not supported by this connection",
            )),
        }
    }

    /// 작업 API 분류 전송
    async fn telemetry(&mut self, api: TelemetryApi) -> DriverResult<()>;

    /// 쿼리 실행
    async fn run(&mut self, request: RunRequest) -> DriverResult<RunResponse>;

    /// 레코드 가져오기 (n = -1이면 전부)
    async fn pull(&mut self, n: i64) -> DriverResult<PullResponse>;

    /// 남은 레코드 버리기
    async fn discard(&mut self) -> DriverResult<PullResponse>;

    /// 트랜잭션 시작
    async fn begin(&mut self, request: BeginRequest) -> DriverResult<BeginResponse>;

    /// 트랜잭션 커밋, 새 북마크 반환
    async fn commit(&mut self) -> DriverResult<Option<String>>;

    /// 트랜잭션 롤백
    async fn rollback(&mut self) -> DriverResult<()>;

    /// 연결 상태 초기화
    async fn reset(&mut self) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode() {
        assert_eq!(AccessMode::default(), AccessMode::Write);
        assert_eq!(AccessMode::Read.as_str(), "r");
        assert_eq!(AccessMode::Write.to_string(), "write");
    }

    #[test]
    fn test_notification_filter_builder() {
        let filter = NotificationFilter::default()
            .with_minimum_severity(NotificationMinSeverity::Warning)
            .with_disabled_classifications(vec![
                NotificationClassification::Hint,
                NotificationClassification::Other("FUTURE".into()),
            ]);

        assert_eq!(filter.minimum_severity, Some(NotificationMinSeverity::Warning));
        assert_eq!(filter.disabled_classifications.as_ref().map(Vec::len), Some(2));
        assert_eq!(NotificationFilter::default().minimum_severity, None);
    }
}
