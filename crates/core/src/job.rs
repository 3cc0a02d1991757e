//! 잡 추상화 — 두 큐 백엔드가 공유하는 계약
//!
//! [`Queue`] trait은 잡 등록을, [`Worker`] trait은 잡 처리를 정의합니다.
//! 인메모리 채널 기반이 아니라 영속 큐(인DB 큐, KV 큐) 위에서 동작하므로
//! at-least-once 실행이 보장되고, 잡 ID는 재시도 간에도 안정적입니다.
//!
//! 워커 이벤트는 이벤트 에미터 대신 이벤트 종류당 variant를 가진
//! [`WorkerEvent`]를 `tokio::mpsc` 채널로 전달합니다.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// dyn-compatible Future 타입 별칭
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 탐지 스캔 잡이 등록되는 큐 이름
pub const SCAN_QUEUE: &str = "detection-scan";

/// 탐지 스캔 잡의 태스크 식별자
pub const SCAN_JOB_NAME: &str = "scan-logs";

/// 잡 최대 시도 횟수 기본값
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 잡 등록 옵션
///
/// 백엔드별 세부 옵션은 노출하지 않습니다. 두 백엔드 모두
/// 이 옵션 집합만 해석합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// 실행 지연 (밀리초)
    pub delay_ms: u64,
    /// 최대 시도 횟수 (기본 3)
    pub max_attempts: u32,
    /// 우선순위 — 낮을수록 먼저 실행
    pub priority: i32,
    /// 중복 제거 키 — 지정 시 큐 전체에서 동일 키의 살아있는 잡은 최대 1개
    pub dedup_key: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            priority: 0,
            dedup_key: None,
        }
    }
}

/// 큐에 등록된 잡
///
/// `id`는 재시도 간에도 변하지 않습니다. `payload`는 불투명한
/// JSON 직렬화 가능 값입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 잡 고유 ID (UUID v4, 재시도 간 안정적)
    pub id: String,
    /// 태스크 식별자 (예: "scan-logs")
    pub name: String,
    /// 잡 페이로드 (불투명 JSON)
    pub payload: serde_json::Value,
    /// 현재까지의 시도 횟수
    pub attempts: u32,
    /// 최대 시도 횟수
    pub max_attempts: u32,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job[{}] name={} attempts={}/{}",
            &self.id[..8.min(self.id.len())],
            self.name,
            self.attempts,
            self.max_attempts,
        )
    }
}

/// 큐 상태 카운터
///
/// 두 백엔드 모두 동일한 형태를 반환합니다. 인DB 백엔드는 완료된
/// 잡 행을 삭제하므로 `completed`를 SQL로는 유지하지 않습니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// 대기 중 (실행 가능 시각 도래, 미점유)
    pub waiting: u64,
    /// 실행 중 (점유됨)
    pub active: u64,
    /// 완료됨
    pub completed: u64,
    /// 실패 (시도 횟수 소진)
    pub failed: u64,
}

impl fmt::Display for QueueCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "waiting={} active={} completed={} failed={}",
            self.waiting, self.active, self.completed, self.failed,
        )
    }
}

/// 워커 관측 이벤트
///
/// 원본 설계의 이벤트 에미터를 대체합니다. 세 종류뿐이므로
/// 단일 mpsc 채널의 variant로 충분합니다.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// 잡이 성공적으로 완료됨
    Completed(Job),
    /// 잡이 시도 횟수를 소진하고 최종 실패함
    Failed(Job, String),
    /// 잡과 무관한 워커 수준 에러 (연결 장애 등)
    Error(String),
}

/// 잡 프로세서 — 워커당 하나 등록됩니다.
///
/// `Err` 반환 시 백엔드가 backoff 후 재시도하며,
/// `max_attempts` 소진 시 [`WorkerEvent::Failed`]가 발행됩니다.
pub type JobProcessor =
    Arc<dyn Fn(Job) -> BoxFuture<'static, Result<(), QueueError>> + Send + Sync>;

/// 잡 등록 capability
///
/// RPITIT 대신 `BoxFuture`를 반환하여 `Arc<dyn Queue>`로
/// 백엔드를 동적으로 교체할 수 있습니다.
pub trait Queue: Send + Sync {
    /// 큐 이름을 반환합니다.
    fn name(&self) -> &str;

    /// 잡을 등록합니다.
    ///
    /// 중복 제거 키가 지정되었고 동일 키의 살아있는 잡이 이미 있으면
    /// 기존 잡을 반환합니다.
    fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> BoxFuture<'_, Result<Job, QueueError>>;

    /// 현재 큐 상태 카운터를 반환합니다.
    fn counts(&self) -> BoxFuture<'_, Result<QueueCounts, QueueError>>;

    /// 큐를 닫습니다. 이후의 enqueue는 실패합니다.
    fn close(&self) -> BoxFuture<'_, Result<(), QueueError>>;
}

/// 잡 처리 capability
///
/// 하나의 큐 이름에 바인딩되며 단일 프로세서를 실행합니다.
pub trait Worker: Send + Sync {
    /// 바인딩된 큐 이름을 반환합니다.
    fn queue_name(&self) -> &str;

    /// 워커 실행 루프를 시작합니다. 중복 호출은 무시됩니다.
    fn start(&self) -> BoxFuture<'_, Result<(), QueueError>>;

    /// 워커를 정지합니다. 진행 중인 잡은 완료를 기다립니다.
    fn close(&self) -> BoxFuture<'_, Result<(), QueueError>>;
}

/// 탐지 스캔 잡 페이로드
///
/// 와이어 형식: `{"tenantId": ..., "projectId": ..., "logIds": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJobPayload {
    /// 테넌트 ID
    pub tenant_id: String,
    /// 프로젝트 ID
    pub project_id: Option<String>,
    /// 스캔할 로그 레코드 ID 목록 (인제스트 순서 보존)
    pub log_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_options_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.delay_ms, 0);
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.priority, 0);
        assert!(options.dedup_key.is_none());
    }

    #[test]
    fn job_display() {
        let job = Job {
            id: "0123456789abcdef".to_owned(),
            name: "scan-logs".to_owned(),
            payload: serde_json::json!({}),
            attempts: 1,
            max_attempts: 3,
        };
        let display = job.to_string();
        assert!(display.contains("scan-logs"));
        assert!(display.contains("1/3"));
    }

    #[test]
    fn queue_counts_display() {
        let counts = QueueCounts {
            waiting: 4,
            active: 2,
            completed: 0,
            failed: 1,
        };
        assert_eq!(
            counts.to_string(),
            "waiting=4 active=2 completed=0 failed=1"
        );
    }

    #[test]
    fn scan_payload_wire_format() {
        let payload = ScanJobPayload {
            tenant_id: "acme".to_owned(),
            project_id: Some("web".to_owned()),
            log_ids: vec!["a".to_owned(), "b".to_owned()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(json["projectId"], "web");
        assert_eq!(json["logIds"][1], "b");

        let parsed: ScanJobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = Job {
            id: "id-1".to_owned(),
            name: "scan-logs".to_owned(),
            payload: serde_json::json!({"tenantId": "acme", "logIds": ["x"]}),
            attempts: 0,
            max_attempts: 3,
        };
        let json = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.payload, job.payload);
    }

    // Queue trait이 dyn-compatible한지 확인하는 컴파일 테스트
    #[test]
    fn queue_trait_is_dyn_compatible() {
        fn assert_dyn(_q: Option<&dyn Queue>, _w: Option<&dyn Worker>) {}
        assert_dyn(None, None);
    }
}
