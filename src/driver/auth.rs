//! Auth & Server Identity
//!
//! 세션 수준 인증 토큰과 서버 식별 정보

use std::collections::HashMap;
use std::fmt;

use super::error::{DriverError, DriverResult};

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
///
/// 세션 설정에 지정하면 풀이 해당 자격 증명으로 연결을 획득합니다.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// Basic 인증 (사용자명/비밀번호)
    Basic {
        username: String,
        password: String,
        realm: Option<String>,
    },
    /// Bearer 토큰
    Bearer { token: String },
    /// 커스텀 인증
    Custom {
        principal: String,
        credentials: String,
        realm: String,
        scheme: String,
        parameters: HashMap<String, String>,
    },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Bearer 토큰 생성
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    /// 주체 (사용자명)
    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::Basic { username, .. } => Some(username),
            Self::Custom { principal, .. } => Some(principal),
            _ => None,
        }
    }
}

// 자격 증명은 로그에 남기지 않음
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("scheme", &self.scheme())
            .field("principal", &self.principal())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 기본 Bolt 포트
    pub const DEFAULT_PORT: u16 = 7687;

    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// "host[:port]" 문자열 파싱
    pub fn parse(address: &str) -> DriverResult<Self> {
        match address.rsplit_once(':') {
            None if !address.is_empty() => Ok(Self::new(address, Self::DEFAULT_PORT)),
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| DriverError::configuration(format!("Invalid port: {}", port)))?;
                Ok(Self::new(host, port))
            }
            _ => Err(DriverError::configuration(format!(
                "Invalid server address: '{}'",
                address
            ))),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// ServerInfo - 서버 정보
// ============================================================================

/// 연결된 서버 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// 서버 주소
    pub address: ServerAddress,
    /// 서버 에이전트
    pub agent: String,
    /// 프로토콜 버전
    pub protocol_version: String,
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Server @ {} (Agent: {}, Protocol: {})",
            self.address, self.agent, self.protocol_version
        )
    }
}
