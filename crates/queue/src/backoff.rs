//! 재시도 backoff 계산
//!
//! 잡 재시도와 연결 재시도가 공유하는 지수 backoff 헬퍼입니다.

use std::time::Duration;

/// 지수 backoff 지연을 계산합니다.
///
/// `min(base * 2^(attempt-1), cap)` 공식을 따릅니다.
/// `attempt`는 1부터 시작하며, 0이 들어오면 1로 취급합니다.
pub fn exponential_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let attempt = attempt.max(1);
    let exponent = (attempt - 1).min(31);
    let factor = 1u64 << exponent;
    base.checked_mul(factor as u32).unwrap_or(cap).min(cap)
}

/// 잡 재시도 backoff (밀리초) — 인DB 백엔드의 run_at 미루기에 사용합니다.
pub fn job_retry_backoff_ms(attempt: u32) -> u64 {
    exponential_backoff(
        attempt,
        Duration::from_millis(1000),
        Duration::from_secs(60),
    )
    .as_millis() as u64
}

/// 연결 재시도 backoff — KV 백엔드의 일시적 에러 재접속에 사용합니다.
///
/// 상한 30초.
pub fn connect_backoff(attempt: u32) -> Duration {
    exponential_backoff(
        attempt,
        Duration::from_millis(1000),
        Duration::from_secs(30),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(1000);
        let cap = Duration::from_secs(30);
        assert_eq!(exponential_backoff(1, base, cap), Duration::from_millis(1000));
        assert_eq!(exponential_backoff(2, base, cap), Duration::from_millis(2000));
        assert_eq!(exponential_backoff(3, base, cap), Duration::from_millis(4000));
        assert_eq!(exponential_backoff(5, base, cap), Duration::from_millis(16000));
    }

    #[test]
    fn backoff_respects_cap() {
        let base = Duration::from_millis(1000);
        let cap = Duration::from_secs(30);
        assert_eq!(exponential_backoff(6, base, cap), cap);
        assert_eq!(exponential_backoff(40, base, cap), cap);
    }

    #[test]
    fn zero_attempt_treated_as_first() {
        let base = Duration::from_millis(1000);
        let cap = Duration::from_secs(30);
        assert_eq!(exponential_backoff(0, base, cap), base);
    }

    #[test]
    fn connect_backoff_caps_at_thirty_seconds() {
        assert_eq!(connect_backoff(1), Duration::from_secs(1));
        assert_eq!(connect_backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn job_retry_backoff_caps_at_one_minute() {
        assert_eq!(job_retry_backoff_ms(1), 1000);
        assert_eq!(job_retry_backoff_ms(2), 2000);
        assert_eq!(job_retry_backoff_ms(20), 60_000);
    }
}
