//! 에러 타입 — 도메인별 에러 정의

/// Logward 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogwardError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 잡 큐 에러
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// 인제스트 에러
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// 스트림 (알림/구독) 에러
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// 탐지 엔진 에러
    #[error("detect error: {0}")]
    Detect(#[from] DetectError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 게시(NOTIFY) 실패
    #[error("notify failed: {0}")]
    Notify(String),
}

impl StorageError {
    /// 일시적 에러인지 판별합니다.
    ///
    /// 일시적 에러(연결 끊김, 풀 고갈)는 잡 시스템이 재시도하고,
    /// 동기 인제스트 경로는 즉시 1회 재시도합니다.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Query(reason) | Self::Notify(reason) => {
                let reason = reason.to_lowercase();
                reason.contains("connection reset")
                    || reason.contains("connection refused")
                    || reason.contains("broken pipe")
                    || reason.contains("timed out")
            }
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Connection(err.to_string())
            }
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

/// 잡 큐 에러
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// 잡 등록 실패
    #[error("enqueue failed: {0}")]
    Enqueue(String),

    /// 잡 페이로드 직렬화/역직렬화 실패
    #[error("payload error: {0}")]
    Payload(String),

    /// 백엔드 연결 실패
    #[error("backend connection failed: {0}")]
    Connection(String),

    /// 잡 처리 실패 (프로세서가 반환한 에러)
    #[error("job processing failed: {0}")]
    Processing(String),

    /// 큐 혹은 워커가 이미 닫힘
    #[error("queue closed: {0}")]
    Closed(String),
}

/// 인제스트 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 배치/필드 검증 실패 — 호출자에게 전달되며 재시도하지 않습니다
    #[error("validation failed at index {index}: {field}: {reason}")]
    Validation {
        index: usize,
        field: String,
        reason: String,
    },

    /// 배치 크기 초과
    #[error("batch too large: {size} logs (max: {max})")]
    BatchTooLarge { size: usize, max: usize },

    /// 빈 배치
    #[error("batch must contain at least one log")]
    EmptyBatch,

    /// 스토리지 실패
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// 상위 레이어가 HTTP 상태로 매핑할 수 있는 안정적 에러 코드를 반환합니다.
    ///
    /// `VALIDATION_FAILED` -> 400, `PAYLOAD_TOO_LARGE` -> 413,
    /// `STORAGE_FAILURE` -> 500.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::EmptyBatch => "VALIDATION_FAILED",
            Self::BatchTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// 호출자에게 반환되는 구조화된 에러 본문을 생성합니다.
    ///
    /// 와이어 형식: `{"error": <메시지>, "code": <코드>}`.
    pub fn wire_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        })
    }
}

/// 스트림 (알림 리스너/구독자) 에러
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// 리스너 연결 실패
    #[error("listener connection failed: {0}")]
    Connection(String),

    /// 재연결 시도 한도 초과 — 운영자 개입 필요
    #[error("listener gave up after {attempts} reconnect attempts: {reason}")]
    ReconnectExhausted { attempts: u32, reason: String },

    /// 구독자 콜백 실패
    #[error("subscriber callback failed: {subscriber_id}: {reason}")]
    Callback {
        subscriber_id: String,
        reason: String,
    },

    /// 리스너가 초기화되지 않음
    #[error("listener not initialized")]
    NotInitialized,
}

/// 탐지 엔진 에러
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// 팩 문서 로딩/파싱 실패
    #[error("pack load error: {pack_id}: {reason}")]
    PackLoad { pack_id: String, reason: String },

    /// 규칙 검증 실패
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation { rule_id: String, reason: String },

    /// 탐지 표현식 파싱 실패
    #[error("condition parse error in rule '{rule_id}': {reason}")]
    ConditionParse { rule_id: String, reason: String },

    /// 알 수 없는 팩 ID
    #[error("unknown pack: {0}")]
    UnknownPack(String),

    /// 임계값 오버라이드 검증 실패
    #[error("invalid threshold override for rule '{rule_id}': {reason}")]
    InvalidThreshold { rule_id: String, reason: String },

    /// 스토리지 실패 (활성화/이벤트/인시던트 저장소)
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_error_codes() {
        let err = IngestError::Validation {
            index: 3,
            field: "service".to_owned(),
            reason: "too long".to_owned(),
        };
        assert_eq!(err.code(), "VALIDATION_FAILED");

        let err = IngestError::BatchTooLarge {
            size: 2000,
            max: 1000,
        };
        assert_eq!(err.code(), "PAYLOAD_TOO_LARGE");

        let err = IngestError::Storage(StorageError::Query("boom".to_owned()));
        assert_eq!(err.code(), "STORAGE_FAILURE");
    }

    #[test]
    fn storage_error_transient_classification() {
        assert!(StorageError::Connection("reset".to_owned()).is_transient());
        assert!(StorageError::Query("connection reset by peer".to_owned()).is_transient());
        assert!(StorageError::Query("pool timed out".to_owned()).is_transient());
        assert!(!StorageError::Query("syntax error at or near".to_owned()).is_transient());
    }

    #[test]
    fn errors_convert_to_logward_error() {
        let err: LogwardError = QueueError::Enqueue("full".to_owned()).into();
        assert!(matches!(err, LogwardError::Queue(_)));
        assert!(err.to_string().contains("full"));

        let err: LogwardError = StreamError::NotInitialized.into();
        assert!(matches!(err, LogwardError::Stream(_)));
    }

    #[test]
    fn wire_body_carries_message_and_code() {
        let err = IngestError::BatchTooLarge {
            size: 1500,
            max: 1000,
        };
        let body = err.wire_body();
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
        assert!(body["error"].as_str().unwrap().contains("1500"));
    }

    #[test]
    fn validation_error_display_includes_index_and_field() {
        let err = IngestError::Validation {
            index: 7,
            field: "message".to_owned(),
            reason: "must not be empty".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("index 7"));
        assert!(msg.contains("message"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn reconnect_exhausted_display() {
        let err = StreamError::ReconnectExhausted {
            attempts: 10,
            reason: "connection refused".to_owned(),
        };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("connection refused"));
    }
}
