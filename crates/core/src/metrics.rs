//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logward_`
//! - 영역: `ingest_`, `publish_`, `queue_`, `listener_`, `detect_`, `incident_`, `daemon_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 큐 이름 레이블 키
pub const LABEL_QUEUE: &str = "queue";

/// 큐 백엔드 레이블 키 (in-db, kv-store)
pub const LABEL_BACKEND: &str = "backend";

/// 심각도 레이블 키 (informational, low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Ingest 메트릭 ──────────────────────────────────────────────────

/// Ingest: 저장된 로그 수 (counter)
pub const INGEST_LOGS_TOTAL: &str = "logward_ingest_logs_total";

/// Ingest: 처리된 배치 수 (counter)
pub const INGEST_BATCHES_TOTAL: &str = "logward_ingest_batches_total";

/// Ingest: 검증 실패 수 (counter)
pub const INGEST_VALIDATION_FAILURES_TOTAL: &str = "logward_ingest_validation_failures_total";

/// Ingest: 커밋 후 작업 드롭 수 (counter) — 커밋 후 큐 포화 시
pub const INGEST_POST_COMMIT_DROPPED_TOTAL: &str = "logward_ingest_post_commit_dropped_total";

// ─── Publish 메트릭 ─────────────────────────────────────────────────

/// Publish: 게시된 채널 알림 수 (counter, 청크 단위)
pub const PUBLISH_NOTIFICATIONS_TOTAL: &str = "logward_publish_notifications_total";

/// Publish: 게시 실패 수 (counter)
pub const PUBLISH_FAILURES_TOTAL: &str = "logward_publish_failures_total";

// ─── Queue 메트릭 ───────────────────────────────────────────────────

/// Queue: 등록된 잡 수 (counter, label: queue)
pub const QUEUE_JOBS_ENQUEUED_TOTAL: &str = "logward_queue_jobs_enqueued_total";

/// Queue: 완료된 잡 수 (counter, label: queue)
pub const QUEUE_JOBS_COMPLETED_TOTAL: &str = "logward_queue_jobs_completed_total";

/// Queue: 최종 실패한 잡 수 (counter, label: queue)
pub const QUEUE_JOBS_FAILED_TOTAL: &str = "logward_queue_jobs_failed_total";

/// Queue: 대기 중 잡 수 (gauge, label: queue)
pub const QUEUE_DEPTH: &str = "logward_queue_depth";

// ─── Listener 메트릭 ────────────────────────────────────────────────

/// Listener: 재연결 시도 수 (counter)
pub const LISTENER_RECONNECTS_TOTAL: &str = "logward_listener_reconnects_total";

/// Listener: 수신한 채널 알림 수 (counter)
pub const LISTENER_NOTIFICATIONS_TOTAL: &str = "logward_listener_notifications_total";

/// Listener: 현재 등록된 구독자 수 (gauge)
pub const LISTENER_SUBSCRIBERS: &str = "logward_listener_subscribers";

// ─── Detect 메트릭 ──────────────────────────────────────────────────

/// Detect: 생성된 탐지 이벤트 수 (counter, label: severity)
pub const DETECT_EVENTS_TOTAL: &str = "logward_detect_events_total";

/// Detect: 평가된 (규칙, 로그) 쌍 수 (counter)
pub const DETECT_RULES_EVALUATED_TOTAL: &str = "logward_detect_rules_evaluated_total";

/// Incident: 새로 열린 인시던트 수 (counter)
pub const INCIDENTS_OPENED_TOTAL: &str = "logward_incidents_opened_total";

/// Incident: 기존 인시던트에 추가된 이벤트 수 (counter)
pub const INCIDENTS_APPENDED_TOTAL: &str = "logward_incidents_appended_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logward_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logward_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `logward-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Ingest
    describe_counter!(
        INGEST_LOGS_TOTAL,
        "Total number of log records persisted by the ingest writer"
    );
    describe_counter!(
        INGEST_BATCHES_TOTAL,
        "Total number of ingest batches accepted"
    );
    describe_counter!(
        INGEST_VALIDATION_FAILURES_TOTAL,
        "Total number of ingest batches rejected by validation"
    );
    describe_counter!(
        INGEST_POST_COMMIT_DROPPED_TOTAL,
        "Total number of post-commit tasks dropped because the queue was full"
    );

    // Publish
    describe_counter!(
        PUBLISH_NOTIFICATIONS_TOTAL,
        "Total number of channel notifications published (one per chunk)"
    );
    describe_counter!(
        PUBLISH_FAILURES_TOTAL,
        "Total number of failed channel publish attempts"
    );

    // Queue
    describe_counter!(
        QUEUE_JOBS_ENQUEUED_TOTAL,
        "Total number of jobs added to a queue"
    );
    describe_counter!(
        QUEUE_JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        QUEUE_JOBS_FAILED_TOTAL,
        "Total number of jobs that exhausted their attempts"
    );
    describe_gauge!(QUEUE_DEPTH, "Current number of waiting jobs per queue");

    // Listener
    describe_counter!(
        LISTENER_RECONNECTS_TOTAL,
        "Total number of listener reconnect attempts"
    );
    describe_counter!(
        LISTENER_NOTIFICATIONS_TOTAL,
        "Total number of channel notifications received by the listener"
    );
    describe_gauge!(
        LISTENER_SUBSCRIBERS,
        "Number of live subscribers currently registered"
    );

    // Detect
    describe_counter!(
        DETECT_EVENTS_TOTAL,
        "Total number of detection events emitted by the rule evaluator"
    );
    describe_counter!(
        DETECT_RULES_EVALUATED_TOTAL,
        "Total number of (rule, log) evaluations performed"
    );
    describe_counter!(
        INCIDENTS_OPENED_TOTAL,
        "Total number of newly opened incidents"
    );
    describe_counter!(
        INCIDENTS_APPENDED_TOTAL,
        "Total number of detection events appended to existing incidents"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Logward daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
