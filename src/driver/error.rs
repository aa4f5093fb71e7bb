//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug)]
pub enum DriverError {
    /// 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 세션 사용 에러 (닫힌 세션, 중복 트랜잭션 등)
    #[error("Session error: {0}")]
    Session(String),

    /// 트랜잭션 사용 에러 (종료된 트랜잭션 등)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// 이미 소비되었거나 범위를 벗어난 결과
    #[error("Result consumed: {0}")]
    ResultConsumed(String),

    /// 레코드가 정확히 하나가 아닌 결과
    #[error("Result not single: {0}")]
    ResultNotSingle(String),

    /// 잘못된 인자 값
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 잘못된 인자 타입
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 풀 에러
    #[error("Pool error: {0}")]
    Pool(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 타입 변환 에러
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// 서버 에러
    #[error("Server error: {code} - {message}")]
    Server { code: String, message: String },

    /// 서비스 불가
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 세션 만료 (리더 변경 등)
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 재시도 한도 초과
    #[error("Transaction failed after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<DriverError>,
    },

    /// 사용자 트랜잭션 함수 에러
    #[error("User callback error: {0}")]
    UserCallback(#[source] Box<dyn StdError + Send + Sync>),

    /// 내부 에러
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 세션 에러 생성
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// 트랜잭션 에러 생성
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// 결과 소비 에러 생성
    pub fn result_consumed(msg: impl Into<String>) -> Self {
        Self::ResultConsumed(msg.into())
    }

    /// 단일 결과 에러 생성
    pub fn result_not_single(msg: impl Into<String>) -> Self {
        Self::ResultNotSingle(msg.into())
    }

    /// 인자 값 에러 생성
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// 인자 타입 에러 생성
    pub fn invalid_type(msg: impl Into<String>) -> Self {
        Self::InvalidType(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 풀 에러 생성
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 세션 만료 에러 생성
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// 타입 변환 에러 생성
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// 서버 에러 생성
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 사용자 코드 에러 래핑
    pub fn user<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::UserCallback(Box::new(err))
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::ServiceUnavailable(_) | Self::SessionExpired(_) => true,
            Self::Server { code, .. } => is_retryable_code(code),
            _ => false,
        }
    }

    /// 사용 에러 여부 (재시도 없이 즉시 반환)
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Session(_)
                | Self::Transaction(_)
                | Self::ResultConsumed(_)
                | Self::ResultNotSingle(_)
                | Self::InvalidArgument(_)
                | Self::InvalidType(_)
        )
    }

    /// 클라이언트 에러 여부
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Authentication(_) | Self::Configuration(_) | Self::TypeConversion(_) => true,
            Self::Server { code, .. } => code.starts_with("Neo.ClientError"),
            other => other.is_usage_error(),
        }
    }

    /// 서버 에러 코드
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            Self::RetryExhausted { source, .. } => source.code(),
            _ => None,
        }
    }
}

/// 재시도 가능한 에러 코드 확인
fn is_retryable_code(code: &str) -> bool {
    match code {
        // 클라이언트가 유발한 종료는 재시도하지 않음
        "Neo.TransientError.Transaction.Terminated"
        | "Neo.TransientError.Transaction.LockClientStopped" => false,
        "Neo.ClientError.Cluster.NotALeader"
        | "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
        | "Neo.ClientError.Security.AuthorizationExpired" => true,
        _ => code.starts_with("Neo.TransientError"),
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// ServerError - 서버 실패 응답
// ============================================================================

/// 서버 실패 응답
///
/// FAILURE 메시지로 전달된 에러 코드와 메시지입니다.
/// 에러 코드는 "Neo.{Classification}.{Category}.{Title}" 형식을 따릅니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// 에러 코드
    pub code: String,
    /// 에러 메시지
    pub message: String,
}

impl ServerError {
    /// 새 에러 생성
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 클라이언트 에러 여부
    pub fn is_client_error(&self) -> bool {
        self.code.starts_with("Neo.ClientError")
    }

    /// 데이터베이스 에러 여부
    pub fn is_database_error(&self) -> bool {
        self.code.starts_with("Neo.DatabaseError")
    }

    /// 트랜지언트 에러 여부
    pub fn is_transient_error(&self) -> bool {
        self.code.starts_with("Neo.TransientError")
    }

    /// 인증 에러 여부
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self.code.as_str(),
            "Neo.ClientError.Security.Unauthorized"
                | "Neo.ClientError.Security.CredentialsExpired"
                | "Neo.ClientError.Security.TokenExpired"
                | "Neo.ClientError.Security.AuthenticationRateLimit"
        )
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for ServerError {}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        if err.is_authentication_error() {
            DriverError::Authentication(err.message)
        } else {
            DriverError::Server {
                code: err.code,
                message: err.message,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
