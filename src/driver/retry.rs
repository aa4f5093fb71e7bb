//! Retry Policy - 트랜잭션 함수 재시도
//!
//! 재시도 가능한 실패가 나면 지수 백오프로 대기한 뒤 트랜잭션 함수를 다시 실행합니다.
//! 대기 자체는 호출자(비동기/블로킹 어댑터)가 수행하고, 여기서는 결정만 내립니다.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::warn;

use super::error::DriverError;

// ============================================================================
// RetryConfig - 재시도 설정
// ============================================================================

/// 트랜잭션 함수 재시도 설정
///
/// | 필드 | 기본값 |
/// |------|--------|
/// | `max_retry_time` | 30초 |
/// | `initial_delay` | 1초 |
/// | `multiplier` | 2.0 |
/// | `jitter` | 0.2 |
/// | `max_delay` | 30초 |
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 첫 시도부터 재시도를 포기할 때까지의 최대 시간
    pub max_retry_time: Duration,
    /// 첫 대기 시간
    pub initial_delay: Duration,
    /// 대기 시간 증가 배수
    pub multiplier: f64,
    /// 대기 시간 흔들림 비율 (0.0 ~ 1.0)
    pub jitter: f64,
    /// 대기 시간 상한
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// 최대 재시도 시간 설정
    pub fn with_max_retry_time(mut self, duration: Duration) -> Self {
        self.max_retry_time = duration;
        self
    }

    /// 첫 대기 시간 설정
    pub fn with_initial_delay(mut self, duration: Duration) -> Self {
        self.initial_delay = duration;
        self
    }

    /// 증가 배수 설정
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// 흔들림 비율 설정
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// 대기 시간 상한 설정
    pub fn with_max_delay(mut self, duration: Duration) -> Self {
        self.max_delay = duration;
        self
    }
}

// ============================================================================
// RetryContext - 호출별 재시도 상태
// ============================================================================

/// 실패 처리 결정
#[derive(Debug)]
pub enum RetryDecision {
    /// 주어진 시간만큼 대기 후 재시도
    RetryAfter(Duration),
    /// 재시도 중단, 에러 반환
    GiveUp(DriverError),
}

/// execute_read / execute_write 호출 하나의 재시도 상태
#[derive(Debug)]
pub struct RetryContext {
    config: RetryConfig,
    /// None이면 마감 없음 (max_retry_time이 시계 범위를 넘음)
    deadline: Option<Instant>,
    attempts: u32,
    base_delay: Duration,
    last_delay: Duration,
}

impl RetryContext {
    /// 새 컨텍스트 생성 (마감 시각 = 지금 + max_retry_time)
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
            deadline: Instant::now().checked_add(config.max_retry_time),
            attempts: 0,
            base_delay: config.initial_delay,
            last_delay: Duration::ZERO,
        }
    }

    /// 실패한 시도 수
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 마감 시각
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 실패한 시도에 대한 결정
    pub fn on_failure(&mut self, error: DriverError) -> RetryDecision {
        self.attempts += 1;

        if !error.is_retryable() {
            return RetryDecision::GiveUp(error);
        }

        let now = Instant::now();
        let remaining = match self.deadline {
            Some(deadline) if now >= deadline => {
                return RetryDecision::GiveUp(DriverError::RetryExhausted {
                    attempts: self.attempts,
                    source: Box::new(error),
                });
            }
            Some(deadline) => Some(deadline - now),
            None => None,
        };

        let delay = self.next_delay();
        RetryDecision::RetryAfter(remaining.map_or(delay, |r| delay.min(r)))
    }

    /// 실패한 시도 뒤 대기할 시간, 재시도하지 않으면 반환할 에러
    pub fn backoff(&mut self, error: DriverError) -> Result<Duration, DriverError> {
        match self.on_failure(error) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    attempt = self.attempts,
                    "Transaction failed and will be retried in {:?}", delay
                );
                Ok(delay)
            }
            RetryDecision::GiveUp(err) => Err(err),
        }
    }

    /// 다음 대기 시간 (단조 비감소, 상한 적용)
    fn next_delay(&mut self) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let spread = base * self.config.jitter;
        let sampled = if spread > 0.0 {
            base - spread + 2.0 * spread * rand::thread_rng().gen::<f64>()
        } else {
            base
        };

        let max_delay = self.config.max_delay;
        let delay = saturating_duration(sampled, max_delay).max(self.last_delay).min(max_delay);

        self.last_delay = delay;
        self.base_delay = saturating_duration(base * self.config.multiplier, max_delay);
        delay
    }
}

/// 초 단위 값을 Duration으로 (음수는 0, 범위 밖이나 NaN은 상한)
fn saturating_duration(secs: f64, cap: Duration) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(cap).min(cap)
}
