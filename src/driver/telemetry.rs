//! Telemetry - 작업 API 분류
//!
//! 연결을 획득할 때마다 어떤 API 형태가 작업을 만들었는지 서버에 한 번 알립니다.

use std::fmt;

// ============================================================================
// TelemetryApi - 텔레메트리 태그
// ============================================================================

/// 서버로 전송되는 API 분류 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryApi {
    /// 트랜잭션 함수 (execute_read / execute_write)
    TxFunc,
    /// 명시적 트랜잭션 (begin_transaction)
    Tx,
    /// 자동 커밋 (run)
    AutoCommit,
    /// 드라이버 내부 작업
    Driver,
}

impl TelemetryApi {
    /// 프로토콜 코드
    pub fn code(self) -> u8 {
        match self {
            Self::TxFunc => 0,
            Self::Tx => 1,
            Self::AutoCommit => 2,
            Self::Driver => 3,
        }
    }

    /// 코드에서 변환
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::TxFunc),
            1 => Some(Self::Tx),
            2 => Some(Self::AutoCommit),
            3 => Some(Self::Driver),
            _ => None,
        }
    }
}

impl fmt::Display for TelemetryApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TxFunc => "TX_FUNC",
            Self::Tx => "TX",
            Self::AutoCommit => "AUTO_COMMIT",
            Self::Driver => "DRIVER",
        };
        f.write_str(name)
    }
}

// ============================================================================
// WorkKind - 작업 호출 형태
// ============================================================================

/// 세션이 연결을 획득하는 호출 형태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    /// Session::run
    AutoCommit,
    /// Session::begin_transaction
    ExplicitTransaction,
    /// execute_read / execute_write 의 시도
    TransactionFunction,
    /// 사용자 API로 귀속되지 않는 드라이버 내부 트랜잭션
    Internal,
}

impl WorkKind {
    /// 텔레메트리 태그로 분류
    pub fn classify(self) -> TelemetryApi {
        match self {
            Self::AutoCommit => TelemetryApi::AutoCommit,
            Self::ExplicitTransaction => TelemetryApi::Tx,
            Self::TransactionFunction => TelemetryApi::TxFunc,
            Self::Internal => TelemetryApi::Driver,
        }
    }
}

impl From<WorkKind> for TelemetryApi {
    fn from(kind: WorkKind) -> Self {
        kind.classify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(WorkKind::AutoCommit.classify(), TelemetryApi::AutoCommit);
        assert_eq!(WorkKind::ExplicitTransaction.classify(), TelemetryApi::Tx);
        assert_eq!(WorkKind::TransactionFunction.classify(), TelemetryApi::TxFunc);
        assert_eq!(TelemetryApi::from(WorkKind::Internal), TelemetryApi::Driver);
    }

    #[test]
    fn test_codes() {
        for api in [
            TelemetryApi::TxFunc,
            TelemetryApi::Tx,
            TelemetryApi::AutoCommit,
            TelemetryApi::Driver,
        ] {
            assert_eq!(TelemetryApi::from_code(api.code()), Some(api));
        }
        assert_eq!(TelemetryApi::AutoCommit.code(), 2);
        assert_eq!(TelemetryApi::from_code(9), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TelemetryApi::TxFunc.to_string(), "TX_FUNC");
        assert_eq!(TelemetryApi::AutoCommit.to_string(), "AUTO_COMMIT");
    }
}
