//! 설정 관리 — logward.toml 파싱 및 런타임 설정
//!
//! [`LogwardConfig`]는 TOML 파일에서 로드되며, 환경 변수
//! (`QUEUE_BACKEND`, `DB_URL`, `KV_URL`, `WORKER_CONCURRENCY`,
//! `POLL_INTERVAL_MS`, `LISTENER_MAX_RECONNECT_ATTEMPTS`)가
//! 파일 값을 덮어씁니다.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 큐 백엔드 선택
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueBackend {
    /// 기본 스토어 위의 폴링 큐 (기본값)
    #[default]
    #[serde(rename = "in-db")]
    InDb,
    /// 외부 KV 스토어 큐
    #[serde(rename = "kv-store")]
    KvStore,
}

impl QueueBackend {
    /// 설정 문자열에서 백엔드를 파싱합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "in-db" | "indb" | "db" => Some(Self::InDb),
            "kv-store" | "kvstore" | "kv" => Some(Self::KvStore),
            _ => None,
        }
    }
}

/// Logward 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogwardConfig {
    /// 일반 설정
    pub general: GeneralConfig,
    /// 스토리지 설정
    pub storage: StorageConfig,
    /// 잡 큐 설정
    pub queue: QueueConfig,
    /// 알림 리스너 설정
    pub listener: ListenerConfig,
    /// 인제스트 설정
    pub ingest: IngestConfig,
    /// 탐지 설정
    pub detect: DetectConfig,
    /// 메트릭 설정
    pub metrics: MetricsConfig,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 미사용)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 스토리지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// PostgreSQL 연결 문자열 (필수)
    pub db_url: String,
    /// KV 스토어 연결 문자열 (kv-store 백엔드 사용 시 필수)
    pub kv_url: Option<String>,
    /// 큐 전용 커넥션 풀 크기
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_url: String::new(),
            kv_url: None,
            pool_size: 10,
        }
    }
}

/// 잡 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 백엔드 선택
    pub backend: QueueBackend,
    /// 워커 동시 실행 수
    pub worker_concurrency: usize,
    /// 인DB 백엔드 폴링 간격 (밀리초, 최소 1000)
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::InDb,
            worker_concurrency: 5,
            poll_interval_ms: 1000,
        }
    }
}

/// 알림 리스너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// 구독 채널 이름
    pub channel: String,
    /// 재연결 최대 시도 횟수
    pub max_reconnect_attempts: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: "logs_new".to_owned(),
            max_reconnect_attempts: 10,
        }
    }
}

/// 인제스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 배치 최대 크기
    pub max_batch_size: usize,
    /// 커밋 후 게시/잡 등록 작업의 전체 타임아웃 (밀리초)
    pub post_commit_timeout_ms: u64,
    /// 커밋 후 작업 큐 용량 (초과 시 드롭)
    pub post_commit_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            post_commit_timeout_ms: 5000,
            post_commit_capacity: 1024,
        }
    }
}

/// 탐지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// 인시던트 상관 윈도우 (초)
    pub incident_window_secs: u64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            incident_window_secs: 900,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
            endpoint: "/metrics".to_owned(),
        }
    }
}

impl LogwardConfig {
    /// TOML 파일에서 설정을 로드하고 환경 변수 오버라이드를 적용합니다.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::ParseFailed {
                    reason: format!("failed to read {}: {e}", path.display()),
                }
            }
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// 환경 변수 오버라이드를 적용합니다.
    ///
    /// 알 수 없는 값은 경고 로그를 남기고 무시합니다.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("QUEUE_BACKEND") {
            match QueueBackend::from_str_loose(&backend) {
                Some(parsed) => self.queue.backend = parsed,
                None => tracing::warn!(value = %backend, "ignoring invalid QUEUE_BACKEND"),
            }
        }
        if let Ok(url) = std::env::var("DB_URL") {
            self.storage.db_url = url;
        }
        if let Ok(url) = std::env::var("KV_URL") {
            self.storage.kv_url = Some(url);
        }
        if let Ok(value) = std::env::var("WORKER_CONCURRENCY") {
            match value.parse::<usize>() {
                Ok(parsed) if parsed > 0 => self.queue.worker_concurrency = parsed,
                _ => tracing::warn!(value = %value, "ignoring invalid WORKER_CONCURRENCY"),
            }
        }
        if let Ok(value) = std::env::var("POLL_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(parsed) => self.queue.poll_interval_ms = parsed,
                Err(_) => tracing::warn!(value = %value, "ignoring invalid POLL_INTERVAL_MS"),
            }
        }
        if let Ok(value) = std::env::var("LISTENER_MAX_RECONNECT_ATTEMPTS") {
            match value.parse::<u32>() {
                Ok(parsed) => self.listener.max_reconnect_attempts = parsed,
                Err(_) => {
                    tracing::warn!(value = %value, "ignoring invalid LISTENER_MAX_RECONNECT_ATTEMPTS");
                }
            }
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const MIN_POLL_INTERVAL_MS: u64 = 1000;
        const MAX_BATCH_SIZE: usize = 1000;

        if self.storage.db_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.db_url".to_owned(),
                reason: "db_url is required".to_owned(),
            });
        }

        if self.queue.backend == QueueBackend::KvStore
            && self.storage.kv_url.as_deref().unwrap_or("").is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "storage.kv_url".to_owned(),
                reason: "kv_url is required when queue.backend is kv-store".to_owned(),
            });
        }

        if self.storage.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.pool_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.queue.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.worker_concurrency".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.queue.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::InvalidValue {
                field: "queue.poll_interval_ms".to_owned(),
                reason: format!("must be at least {MIN_POLL_INTERVAL_MS}"),
            });
        }

        if self.listener.channel.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "listener.channel".to_owned(),
                reason: "channel must not be empty".to_owned(),
            });
        }

        if self.ingest.max_batch_size == 0 || self.ingest.max_batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "ingest.max_batch_size".to_owned(),
                reason: format!("must be 1-{MAX_BATCH_SIZE}"),
            });
        }

        if self.detect.incident_window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "detect.incident_window_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        match self.general.log_format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "general.log_format".to_owned(),
                    reason: format!("unknown format '{other}', expected 'json' or 'pretty'"),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> LogwardConfig {
        LogwardConfig {
            storage: StorageConfig {
                db_url: "postgres://localhost/logward".to_owned(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_contract() {
        let config = LogwardConfig::default();
        assert_eq!(config.queue.backend, QueueBackend::InDb);
        assert_eq!(config.queue.worker_concurrency, 5);
        assert_eq!(config.queue.poll_interval_ms, 1000);
        assert_eq!(config.listener.channel, "logs_new");
        assert_eq!(config.listener.max_reconnect_attempts, 10);
        assert_eq!(config.ingest.max_batch_size, 1000);
        assert_eq!(config.detect.incident_window_secs, 900);
        assert_eq!(config.storage.pool_size, 10);
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn missing_db_url_fails() {
        let config = LogwardConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn kv_backend_requires_kv_url() {
        let mut config = valid_config();
        config.queue.backend = QueueBackend::KvStore;
        assert!(config.validate().is_err());

        config.storage.kv_url = Some("redis://localhost".to_owned());
        config.validate().unwrap();
    }

    #[test]
    fn poll_interval_below_one_second_fails() {
        let mut config = valid_config();
        config.queue.poll_interval_ms = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_batch_limit_fails() {
        let mut config = valid_config();
        config.ingest.max_batch_size = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_fails() {
        let mut config = valid_config();
        config.general.log_format = "xml".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_from_str_loose() {
        assert_eq!(QueueBackend::from_str_loose("in-db"), Some(QueueBackend::InDb));
        assert_eq!(
            QueueBackend::from_str_loose("KV-STORE"),
            Some(QueueBackend::KvStore)
        );
        assert_eq!(QueueBackend::from_str_loose("rabbitmq"), None);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
[storage]
db_url = "postgres://db/logward"

[queue]
backend = "kv-store"
worker_concurrency = 8
"#;
        let config: LogwardConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.queue.backend, QueueBackend::KvStore);
        assert_eq!(config.queue.worker_concurrency, 8);
        // 나머지는 기본값
        assert_eq!(config.queue.poll_interval_ms, 1000);
        assert_eq!(config.listener.channel, "logs_new");
    }

    #[tokio::test]
    async fn load_missing_file_returns_not_found() {
        let result = LogwardConfig::load(Path::new("/nonexistent/logward.toml")).await;
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logward.toml");
        tokio::fs::write(&path, "[storage]\ndb_url = \"postgres://x/y\"\n")
            .await
            .unwrap();

        let config = LogwardConfig::load(&path).await.unwrap();
        assert_eq!(config.storage.db_url, "postgres://x/y");
    }
}
