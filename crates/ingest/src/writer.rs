//! 인제스트 라이터 -- 배치 검증, ID 부여, 원자적 저장
//!
//! 하나의 (tenant, project)에 속한 1~1000개 로그 배치를 받아
//! 검증하고, UUID를 부여한 뒤 단일 트랜잭션으로 저장합니다.
//! 부여된 ID 목록을 입력 순서대로 반환합니다.
//!
//! 저장 성공 후에는 (1) 채널 알림 게시, (2) 탐지 스캔 잡 등록을
//! 커밋 후 작업 큐에 제출합니다. 응답은 이 작업들을 기다리지 않으며,
//! 작업 큐가 가득 차면 드롭하고 메트릭만 남깁니다.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use logward_core::error::IngestError;
use logward_core::job::{JobOptions, Queue, ScanJobPayload, SCAN_JOB_NAME};
use logward_core::types::{LogRecord, NewLogRecord};

use crate::publisher::NotifyPublisher;
use crate::store::LogStore;

/// 서비스명 최대 길이
const MAX_SERVICE_LEN: usize = 100;

/// span_id 형식: 16자리 소문자 16진수
static SPAN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-f0-9]{16}$").expect("span id regex is valid"));

/// 인제스트 입력 배치
#[derive(Debug, Clone)]
pub struct IngestBatch {
    /// 테넌트 ID
    pub tenant_id: String,
    /// 프로젝트 ID (선택)
    pub project_id: Option<String>,
    /// 로그 목록 (1~max_batch_size)
    pub logs: Vec<NewLogRecord>,
}

/// 인제스트 결과
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestResponse {
    /// 수락된 로그 수
    pub accepted: usize,
    /// 부여된 ID 목록 (입력 순서)
    pub ids: Vec<String>,
}

/// 커밋 후 작업 -- 게시와 잡 등록에 필요한 정보
#[derive(Debug)]
struct PostCommitWork {
    tenant_id: String,
    project_id: Option<String>,
    ids: Vec<String>,
}

/// 배치를 검증합니다.
///
/// 검증 에러는 호출자에게 그대로 전달되며 재시도되지 않습니다.
pub fn validate_batch(batch: &IngestBatch, max_batch_size: usize) -> Result<(), IngestError> {
    if batch.logs.is_empty() {
        return Err(IngestError::EmptyBatch);
    }
    if batch.logs.len() > max_batch_size {
        return Err(IngestError::BatchTooLarge {
            size: batch.logs.len(),
            max: max_batch_size,
        });
    }

    for (index, log) in batch.logs.iter().enumerate() {
        if log.service.is_empty() || log.service.chars().count() > MAX_SERVICE_LEN {
            return Err(IngestError::Validation {
                index,
                field: "service".to_owned(),
                reason: format!("must be 1-{MAX_SERVICE_LEN} characters"),
            });
        }
        if log.message.is_empty() {
            return Err(IngestError::Validation {
                index,
                field: "message".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if let Some(ref span_id) = log.span_id
            && !SPAN_ID_RE.is_match(span_id)
        {
            return Err(IngestError::Validation {
                index,
                field: "span_id".to_owned(),
                reason: "must match ^[a-f0-9]{16}$".to_owned(),
            });
        }
    }

    Ok(())
}

/// 인제스트 라이터
///
/// 로그 레코드를 단독으로 생성하는 컴포넌트입니다.
pub struct IngestWriter {
    store: Arc<LogStore>,
    post_commit_tx: mpsc::Sender<PostCommitWork>,
    max_batch_size: usize,
}

impl IngestWriter {
    /// 라이터와 커밋 후 러너를 함께 생성합니다.
    ///
    /// 러너는 호출자가 [`PostCommitRunner::run`]으로 스폰해야 합니다.
    pub fn new(
        store: Arc<LogStore>,
        publisher: Arc<NotifyPublisher>,
        scan_queue: Arc<dyn Queue>,
        max_batch_size: usize,
        post_commit_capacity: usize,
        post_commit_timeout: Duration,
    ) -> (Self, PostCommitRunner) {
        let (tx, rx) = mpsc::channel(post_commit_capacity.max(1));
        let writer = Self {
            store,
            post_commit_tx: tx,
            max_batch_size,
        };
        let runner = PostCommitRunner {
            rx,
            publisher,
            scan_queue,
            timeout: post_commit_timeout,
        };
        (writer, runner)
    }

    /// 배치를 저장하고 부여된 ID를 입력 순서대로 반환합니다.
    ///
    /// 일시적 스토리지 에러는 즉시 1회 재시도한 뒤 전달됩니다.
    /// 게시/잡 등록 실패는 결과에 영향을 주지 않습니다.
    pub async fn ingest(&self, batch: IngestBatch) -> Result<IngestResponse, IngestError> {
        if let Err(e) = validate_batch(&batch, self.max_batch_size) {
            metrics::counter!(logward_core::metrics::INGEST_VALIDATION_FAILURES_TOTAL)
                .increment(1);
            return Err(e);
        }

        let received_at = Utc::now();
        let records: Vec<LogRecord> = batch
            .logs
            .iter()
            .map(|log| LogRecord {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: batch.tenant_id.clone(),
                project_id: batch.project_id.clone(),
                timestamp: log.timestamp.unwrap_or(received_at),
                service: log.service.clone(),
                level: log.level,
                message: log.message.clone(),
                attributes: if log.attributes.is_null() {
                    serde_json::json!({})
                } else {
                    log.attributes.clone()
                },
                span_id: log.span_id.clone(),
            })
            .collect();

        if let Err(first_err) = self.store.insert_batch(&records).await {
            if !first_err.is_transient() {
                return Err(first_err.into());
            }
            tracing::warn!(
                tenant_id = %batch.tenant_id,
                error = %first_err,
                "transient storage error, retrying batch insert once"
            );
            self.store.insert_batch(&records).await?;
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        metrics::counter!(logward_core::metrics::INGEST_BATCHES_TOTAL).increment(1);
        metrics::counter!(logward_core::metrics::INGEST_LOGS_TOTAL).increment(ids.len() as u64);

        let work = PostCommitWork {
            tenant_id: batch.tenant_id,
            project_id: batch.project_id,
            ids: ids.clone(),
        };
        if self.post_commit_tx.try_send(work).is_err() {
            metrics::counter!(logward_core::metrics::INGEST_POST_COMMIT_DROPPED_TOTAL)
                .increment(1);
            tracing::warn!("post-commit queue full, dropping notification/scan for batch");
        }

        Ok(IngestResponse {
            accepted: ids.len(),
            ids,
        })
    }
}

/// 커밋 후 작업 러너
///
/// 제한된 용량의 채널에서 작업을 꺼내 게시와 잡 등록을 수행합니다.
/// 요청당 태스크를 스폰하는 대신 단일 러너가 순서대로 처리하므로
/// 배치 간 게시 순서도 제출 순서를 따릅니다.
pub struct PostCommitRunner {
    rx: mpsc::Receiver<PostCommitWork>,
    publisher: Arc<NotifyPublisher>,
    scan_queue: Arc<dyn Queue>,
    timeout: Duration,
}

impl PostCommitRunner {
    /// 러너 루프를 실행합니다. cancel 시 잔여 작업을 드레인하고 종료합니다.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!("post-commit runner started");
        loop {
            tokio::select! {
                work = self.rx.recv() => {
                    match work {
                        Some(work) => self.handle(work).await,
                        None => break,
                    }
                }
                _ = cancel.cancelled() => {
                    // 이미 수락된 배치의 알림/스캔은 최대한 내보냅니다.
                    while let Ok(work) = self.rx.try_recv() {
                        self.handle(work).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!("post-commit runner stopped");
    }

    async fn handle(&self, work: PostCommitWork) {
        // (1) 채널 알림 -- 프로젝트가 있는 배치만 게시 대상입니다.
        if let Some(ref project_id) = work.project_id {
            let publish = self.publisher.publish(project_id, &work.ids);
            if tokio::time::timeout(self.timeout, publish).await.is_err() {
                tracing::warn!(
                    project_id = %project_id,
                    "notification publish timed out"
                );
            }
        }

        // (2) 탐지 스캔 잡
        let payload = ScanJobPayload {
            tenant_id: work.tenant_id.clone(),
            project_id: work.project_id.clone(),
            log_ids: work.ids.clone(),
        };
        let payload = match serde_json::to_value(&payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize scan payload");
                return;
            }
        };

        let enqueue = self
            .scan_queue
            .enqueue(SCAN_JOB_NAME, payload, JobOptions::default());
        match tokio::time::timeout(self.timeout, enqueue).await {
            Ok(Ok(job)) => {
                tracing::debug!(job_id = %job.id, logs = work.ids.len(), "scan job enqueued");
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    tenant_id = %work.tenant_id,
                    error = %e,
                    "failed to enqueue scan job"
                );
            }
            Err(_) => {
                tracing::warn!(tenant_id = %work.tenant_id, "scan job enqueue timed out");
            }
        }
    }
}
