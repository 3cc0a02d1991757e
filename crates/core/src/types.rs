//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 모든 크레이트가 공유하는 데이터 구조를 정의합니다.
//! 로그 레코드, 탐지 이벤트, 인시던트는 모두 테넌트 단위로 스코프됩니다.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 탐지 이벤트에 포함되는 로그 메시지 발췌 최대 길이 (문자 수)
pub const MESSAGE_EXCERPT_CHARS: usize = 200;

/// 로그 레벨
///
/// `Ord` 구현으로 레벨 비교가 가능합니다 (`Debug < Info < Warn < Error < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 디버그
    Debug,
    /// 정보 (기본값)
    #[default]
    Info,
    /// 경고
    Warn,
    /// 에러
    Error,
    /// 치명적
    Critical,
}

impl LogLevel {
    /// 문자열에서 로그 레벨을 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            "critical" | "crit" | "fatal" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 소문자 문자열 표현을 반환합니다 (저장/와이어 형식).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 탐지 심각도
///
/// `Ord` 구현으로 심각도 비교가 가능합니다
/// (`Informational < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 정보성 이벤트
    #[default]
    Informational,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 — 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 심각도 가중치를 반환합니다 (informational=1 .. critical=5).
    pub fn weight(&self) -> u8 {
        match self {
            Self::Informational => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
            Self::Critical => 5,
        }
    }

    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "informational" | "info" => Some(Self::Informational),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 소문자 문자열 표현을 반환합니다 (저장/와이어 형식).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 저장된 로그 레코드
///
/// 인제스트 라이터가 생성한 이후에는 불변입니다.
/// (tenant, project) 내에서 timestamp 순으로 정렬됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// 레코드 고유 ID (UUID v4)
    pub id: String,
    /// 테넌트 (org) ID
    pub tenant_id: String,
    /// 프로젝트 ID (선택)
    pub project_id: Option<String>,
    /// 로그 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 서비스명 (1~100자)
    pub service: String,
    /// 로그 레벨
    pub level: LogLevel,
    /// 로그 메시지 (비어있지 않음)
    pub message: String,
    /// 자유 형식 구조화 속성
    #[serde(default)]
    pub attributes: serde_json::Value,
    /// 분산 추적 span ID (선택, `^[a-f0-9]{16}$`)
    pub span_id: Option<String>,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.level, self.tenant_id, self.service, self.message,
        )
    }
}

/// 인제스트 입력 로그
///
/// ID가 아직 부여되지 않은 로그 배치의 한 항목입니다.
/// 검증 후 [`LogRecord`]로 변환됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLogRecord {
    /// 로그 발생 시각 (생략 시 수신 시각)
    pub timestamp: Option<DateTime<Utc>>,
    /// 서비스명
    pub service: String,
    /// 로그 레벨
    pub level: LogLevel,
    /// 로그 메시지
    pub message: String,
    /// 자유 형식 구조화 속성
    #[serde(default)]
    pub attributes: serde_json::Value,
    /// 분산 추적 span ID (선택)
    pub span_id: Option<String>,
}

/// 탐지 이벤트 — 규칙 매칭 한 건
///
/// 규칙 평가기가 단독으로 생성하며, append-only입니다.
/// 항상 동일 테넌트/프로젝트의 기존 [`LogRecord`]를 참조합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// 이벤트 고유 ID (UUID v4)
    pub id: String,
    /// 테넌트 ID
    pub tenant_id: String,
    /// 프로젝트 ID (선택)
    pub project_id: Option<String>,
    /// 활성화 기준의 규칙 ID
    pub rule_id: String,
    /// 규칙이 속한 팩 ID
    pub pack_id: String,
    /// 매칭된 로그 레코드 ID
    pub log_id: String,
    /// 매칭된 로그의 서비스명
    pub service: String,
    /// 오버라이드 적용 후의 유효 심각도
    pub severity: Severity,
    /// 이벤트 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 로그 메시지 발췌 (최대 [`MESSAGE_EXCERPT_CHARS`]자)
    pub message_excerpt: String,
}

impl fmt::Display for DetectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DetectionEvent[{}] rule={} severity={} log={}",
            &self.id[..8.min(self.id.len())],
            self.rule_id,
            self.severity,
            self.log_id,
        )
    }
}

/// 인시던트 상태
///
/// 상태 전환: `open -> investigating -> resolved | false_positive`.
/// 종결 상태(resolved, false_positive)는 새 이벤트로 재개되지 않습니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// 열림 (기본값)
    #[default]
    Open,
    /// 조사 중
    Investigating,
    /// 해결됨 (종결)
    Resolved,
    /// 오탐 (종결)
    FalsePositive,
}

impl IncidentStatus {
    /// 종결 상태인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::FalsePositive)
    }

    /// 소문자 문자열 표현을 반환합니다 (저장 형식).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }

    /// 저장 형식 문자열에서 상태를 파싱합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "investigating" => Some(Self::Investigating),
            "resolved" => Some(Self::Resolved),
            "false_positive" => Some(Self::FalsePositive),
            _ => None,
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 인시던트 — 연관된 탐지 이벤트의 그룹
///
/// 인시던트 상관기가 단독으로 생성/변경합니다.
/// `detection_count`는 연결된 탐지 이벤트 수와 항상 일치합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// 인시던트 고유 ID (UUID v4)
    pub id: String,
    /// 테넌트 ID
    pub tenant_id: String,
    /// 프로젝트 ID (선택)
    pub project_id: Option<String>,
    /// 상관 키의 규칙 패밀리 (인스턴스 접미사 제거된 규칙 ID)
    pub rule_family: String,
    /// 현재 상태
    pub status: IncidentStatus,
    /// 기여 이벤트 중 최대 심각도
    pub severity: Severity,
    /// 연결된 탐지 이벤트 수
    pub detection_count: u64,
    /// 영향받은 서비스 집합
    pub affected_services: BTreeSet<String>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
    /// 해결 시각 (종결 시)
    pub resolved_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Incident[{}] family={} status={} severity={} detections={}",
            &self.id[..8.min(self.id.len())],
            self.rule_family,
            self.status,
            self.severity,
            self.detection_count,
        )
    }
}

/// 채널 알림 페이로드
///
/// `logs_new` 채널에 게시되는 메시지 형식입니다.
/// 와이어 형식: `{"projectId": ..., "logIds": [...], "timestamp": ...}` (UTF-8 JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogNotification {
    /// 프로젝트 ID
    pub project_id: String,
    /// 새로 저장된 로그 레코드 ID 목록 (입력 순서 보존)
    pub log_ids: Vec<String>,
    /// 게시 시각 (ISO-8601)
    pub timestamp: DateTime<Utc>,
}

/// 메시지 발췌를 생성합니다 (최대 `max_chars`자, 문자 경계 안전).
pub fn message_excerpt(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn log_level_from_str_loose() {
        assert_eq!(LogLevel::from_str_loose("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str_loose("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str_loose("fatal"), Some(LogLevel::Critical));
        assert_eq!(LogLevel::from_str_loose("nope"), None);
    }

    #[test]
    fn log_level_serde_is_lowercase() {
        let json = serde_json::to_string(&LogLevel::Error).unwrap();
        assert_eq!(json, "\"error\"");
        let level: LogLevel = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(level, LogLevel::Critical);
    }

    #[test]
    fn severity_ordering_and_weight() {
        assert!(Severity::Informational < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);

        assert_eq!(Severity::Informational.weight(), 1);
        assert_eq!(Severity::Low.weight(), 2);
        assert_eq!(Severity::Medium.weight(), 3);
        assert_eq!(Severity::High.weight(), 4);
        assert_eq!(Severity::Critical.weight(), 5);
    }

    #[test]
    fn severity_from_str_loose() {
        assert_eq!(
            Severity::from_str_loose("informational"),
            Some(Severity::Informational)
        );
        assert_eq!(
            Severity::from_str_loose("info"),
            Some(Severity::Informational)
        );
        assert_eq!(
            Severity::from_str_loose("CRITICAL"),
            Some(Severity::Critical)
        );
        assert_eq!(Severity::from_str_loose("med"), Some(Severity::Medium));
        assert_eq!(Severity::from_str_loose("unknown"), None);
    }

    #[test]
    fn incident_status_terminal() {
        assert!(!IncidentStatus::Open.is_terminal());
        assert!(!IncidentStatus::Investigating.is_terminal());
        assert!(IncidentStatus::Resolved.is_terminal());
        assert!(IncidentStatus::FalsePositive.is_terminal());
    }

    #[test]
    fn incident_status_roundtrip() {
        for status in [
            IncidentStatus::Open,
            IncidentStatus::Investigating,
            IncidentStatus::Resolved,
            IncidentStatus::FalsePositive,
        ] {
            assert_eq!(
                IncidentStatus::from_str_loose(status.as_str()),
                Some(status)
            );
        }
    }

    #[test]
    fn notification_wire_format_is_camel_case() {
        let notification = LogNotification {
            project_id: "proj-1".to_owned(),
            log_ids: vec!["a".to_owned(), "b".to_owned()],
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("\"projectId\""));
        assert!(json.contains("\"logIds\""));
        assert!(json.contains("\"timestamp\""));

        let parsed: LogNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, notification);
    }

    #[test]
    fn message_excerpt_respects_char_boundary() {
        let message = "한글과 english가 섞인 메시지 ".repeat(30);
        let excerpt = message_excerpt(&message, MESSAGE_EXCERPT_CHARS);
        assert_eq!(excerpt.chars().count(), MESSAGE_EXCERPT_CHARS);
    }

    #[test]
    fn message_excerpt_short_message_unchanged() {
        let excerpt = message_excerpt("short", MESSAGE_EXCERPT_CHARS);
        assert_eq!(excerpt, "short");
    }

    #[test]
    fn log_record_display() {
        let record = LogRecord {
            id: "log-1".to_owned(),
            tenant_id: "acme".to_owned(),
            project_id: Some("web".to_owned()),
            timestamp: Utc::now(),
            service: "api".to_owned(),
            level: LogLevel::Error,
            message: "connection refused".to_owned(),
            attributes: serde_json::json!({}),
            span_id: None,
        };
        let display = record.to_string();
        assert!(display.contains("error"));
        assert!(display.contains("acme"));
        assert!(display.contains("api"));
    }

    #[test]
    fn incident_display() {
        let incident = Incident {
            id: "0123456789abcdef".to_owned(),
            tenant_id: "acme".to_owned(),
            project_id: None,
            rule_family: "high-error-rate".to_owned(),
            status: IncidentStatus::Open,
            severity: Severity::High,
            detection_count: 3,
            affected_services: BTreeSet::from(["api".to_owned()]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
        };
        let display = incident.to_string();
        assert!(display.contains("high-error-rate"));
        assert!(display.contains("open"));
        assert!(display.contains("detections=3"));
    }
}
