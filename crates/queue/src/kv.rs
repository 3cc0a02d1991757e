//! KV 스토어 큐 백엔드 -- 외부 KV 스토어의 네이티브 프리미티브를 사용합니다.
//!
//! 대기 잡은 리스트, 지연/완료/실패 잡은 타임스탬프 점수의 정렬집합,
//! 잡 본문은 개별 키에 저장합니다.
//!
//! # 키 구조
//! ```text
//! logward:{queue}:wait      -- 대기 잡 ID 리스트
//! logward:{queue}:active    -- 실행 중 잡 ID 리스트
//! logward:{queue}:delayed   -- 지연/재시도 잡 (score = 실행 가능 시각 ms)
//! logward:{queue}:completed -- 완료 잡 (score = 완료 시각 ms, 1시간/100개 보존)
//! logward:{queue}:failed    -- 최종 실패 잡 (score = 실패 시각 ms, 24시간/50개 보존)
//! logward:{queue}:job:{id}  -- 잡 본문 (JSON)
//! logward:{queue}:dedup:{k} -- 중복 제거 키 -> 잡 ID
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use logward_core::error::QueueError;
use logward_core::job::{BoxFuture, Job, JobOptions, JobProcessor, Queue, QueueCounts, Worker, WorkerEvent};

use crate::backoff::{connect_backoff, job_retry_backoff_ms};

/// 완료 잡 보존: 1시간
const COMPLETED_RETENTION: Duration = Duration::from_secs(3600);
/// 완료 잡 보존: 최대 100개
const COMPLETED_KEEP: usize = 100;
/// 실패 잡 보존: 24시간
const FAILED_RETENTION: Duration = Duration::from_secs(24 * 3600);
/// 실패 잡 보존: 최대 50개
const FAILED_KEEP: usize = 50;
/// 한 번의 틱에서 승격하는 지연 잡 최대 수
const PROMOTE_BATCH: isize = 100;

/// 일시적 에러인지 판별합니다.
///
/// 연결 리셋/거부, 타임아웃, 읽기 전용 레플리카 전환만 재연결 대상입니다.
pub fn is_transient(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.kind() == redis::ErrorKind::ReadOnly
}

/// 저장되는 잡 본문 -- 재시도에 필요한 옵션을 함께 보존합니다.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct KvJobEnvelope {
    job: Job,
    priority: i32,
    dedup_key: Option<String>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 큐별 키 이름 헬퍼
#[derive(Debug, Clone)]
struct KeySet {
    wait: String,
    active: String,
    delayed: String,
    completed: String,
    failed: String,
    prefix: String,
}

impl KeySet {
    fn new(queue: &str) -> Self {
        Self {
            wait: format!("logward:{queue}:wait"),
            active: format!("logward:{queue}:active"),
            delayed: format!("logward:{queue}:delayed"),
            completed: format!("logward:{queue}:completed"),
            failed: format!("logward:{queue}:failed"),
            prefix: format!("logward:{queue}"),
        }
    }

    fn job(&self, id: &str) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    fn dedup(&self, key: &str) -> String {
        format!("{}:dedup:{key}", self.prefix)
    }
}

/// KV 스토어 큐
pub struct KvQueue {
    name: String,
    keys: KeySet,
    manager: ConnectionManager,
    closed: AtomicBool,
}

impl KvQueue {
    /// 새 KV 큐를 생성합니다.
    pub fn new(name: impl Into<String>, manager: ConnectionManager) -> Self {
        let name = name.into();
        Self {
            keys: KeySet::new(&name),
            name,
            manager,
            closed: AtomicBool::new(false),
        }
    }

    async fn store_envelope(
        &self,
        con: &mut ConnectionManager,
        envelope: &KvJobEnvelope,
    ) -> Result<(), QueueError> {
        let body = serde_json::to_string(envelope)
            .map_err(|e| QueueError::Payload(e.to_string()))?;
        let _: () = redis::cmd("SET")
            .arg(self.keys.job(&envelope.job.id))
            .arg(body)
            .query_async(con)
            .await
            .map_err(|e| QueueError::Enqueue(e.to_string()))?;
        Ok(())
    }

    async fn enqueue_inner(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Job, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed(self.name.clone()));
        }

        let mut con = self.manager.clone();
        let id = uuid::Uuid::new_v4().to_string();

        // 중복 제거: SET NX가 실패하면 동일 키의 살아있는 잡이 존재합니다.
        if let Some(ref key) = options.dedup_key {
            let dedup_key = self.keys.dedup(key);
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&dedup_key)
                .arg(&id)
                .arg("NX")
                .query_async(&mut con)
                .await
                .map_err(|e| QueueError::Enqueue(e.to_string()))?;

            if acquired.is_none() {
                let existing_id: Option<String> = redis::cmd("GET")
                    .arg(&dedup_key)
                    .query_async(&mut con)
                    .await
                    .map_err(|e| QueueError::Enqueue(e.to_string()))?;

                if let Some(existing_id) = existing_id {
                    let body: Option<String> = redis::cmd("GET")
                        .arg(self.keys.job(&existing_id))
                        .query_async(&mut con)
                        .await
                        .map_err(|e| QueueError::Enqueue(e.to_string()))?;

                    if let Some(body) = body {
                        let envelope: KvJobEnvelope = serde_json::from_str(&body)
                            .map_err(|e| QueueError::Payload(e.to_string()))?;
                        return Ok(envelope.job);
                    }
                }
                // 잡 본문이 이미 정리됨 -- 고아 dedup 키를 제거하고 새로 등록합니다.
                let _: () = redis::cmd("DEL")
                    .arg(&dedup_key)
                    .query_async(&mut con)
                    .await
                    .map_err(|e| QueueError::Enqueue(e.to_string()))?;
                let _: Option<String> = redis::cmd("SET")
                    .arg(&dedup_key)
                    .arg(&id)
                    .arg("NX")
                    .query_async(&mut con)
                    .await
                    .map_err(|e| QueueError::Enqueue(e.to_string()))?;
            }
        }

        let job = Job {
            id: id.clone(),
            name: job_name.to_owned(),
            payload,
            attempts: 0,
            max_attempts: options.max_attempts,
        };
        let envelope = KvJobEnvelope {
            job: job.clone(),
            priority: options.priority,
            dedup_key: options.dedup_key.clone(),
        };
        self.store_envelope(&mut con, &envelope).await?;

        if options.delay_ms > 0 {
            let run_at = now_ms() + options.delay_ms as i64;
            let _: () = redis::cmd("ZADD")
                .arg(&self.keys.delayed)
                .arg(run_at)
                .arg(&id)
                .query_async(&mut con)
                .await
                .map_err(|e| QueueError::Enqueue(e.to_string()))?;
        } else if options.priority < 0 {
            // 리스트는 우선순위 정렬을 지원하지 않으므로 음수 우선순위는
            // 소비 측(RIGHT pop)으로 바로 들어가도록 오른쪽에 넣습니다.
            let _: () = redis::cmd("RPUSH")
                .arg(&self.keys.wait)
                .arg(&id)
                .query_async(&mut con)
                .await
                .map_err(|e| QueueError::Enqueue(e.to_string()))?;
        } else {
            let _: () = redis::cmd("LPUSH")
                .arg(&self.keys.wait)
                .arg(&id)
                .query_async(&mut con)
                .await
                .map_err(|e| QueueError::Enqueue(e.to_string()))?;
        }

        metrics::counter!(
            logward_core::metrics::QUEUE_JOBS_ENQUEUED_TOTAL,
            logward_core::metrics::LABEL_QUEUE => self.name.clone()
        )
        .increment(1);

        Ok(job)
    }

    async fn counts_inner(&self) -> Result<QueueCounts, QueueError> {
        let mut con = self.manager.clone();

        let waiting_list: i64 = redis::cmd("LLEN")
            .arg(&self.keys.wait)
            .query_async(&mut con)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let delayed: i64 = redis::cmd("ZCARD")
            .arg(&self.keys.delayed)
            .query_async(&mut con)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let active: i64 = redis::cmd("LLEN")
            .arg(&self.keys.active)
            .query_async(&mut con)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let completed: i64 = redis::cmd("ZCARD")
            .arg(&self.keys.completed)
            .query_async(&mut con)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let failed: i64 = redis::cmd("ZCARD")
            .arg(&self.keys.failed)
            .query_async(&mut con)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(QueueCounts {
            waiting: (waiting_list + delayed).max(0) as u64,
            active: active.max(0) as u64,
            completed: completed.max(0) as u64,
            failed: failed.max(0) as u64,
        })
    }
}

impl Queue for KvQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> BoxFuture<'_, Result<Job, QueueError>> {
        let job_name = job_name.to_owned();
        Box::pin(async move { self.enqueue_inner(&job_name, payload, options).await })
    }

    fn counts(&self) -> BoxFuture<'_, Result<QueueCounts, QueueError>> {
        Box::pin(self.counts_inner())
    }

    fn close(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

/// KV 큐 워커
///
/// 지연 잡 승격과 대기 잡 소비를 폴링으로 수행합니다.
/// 일시적 에러에서는 지수 backoff(상한 30초)로 재시도하고,
/// 그 외 에러는 [`WorkerEvent::Error`]로 보고합니다.
pub struct KvWorker {
    queue_name: String,
    keys: KeySet,
    manager: ConnectionManager,
    processor: JobProcessor,
    events: mpsc::Sender<WorkerEvent>,
    concurrency: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl KvWorker {
    /// 새 KV 워커를 생성합니다.
    pub fn new(
        queue_name: impl Into<String>,
        manager: ConnectionManager,
        processor: JobProcessor,
        events: mpsc::Sender<WorkerEvent>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        let queue_name = queue_name.into();
        Self {
            keys: KeySet::new(&queue_name),
            queue_name,
            manager,
            processor,
            events,
            concurrency: concurrency.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(100)),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// 실행 시각이 도래한 지연 잡을 대기 리스트로 승격합니다.
    async fn promote_delayed(
        keys: &KeySet,
        con: &mut ConnectionManager,
    ) -> Result<(), redis::RedisError> {
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&keys.delayed)
            .arg("-inf")
            .arg(now_ms())
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(con)
            .await?;

        for id in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(&keys.delayed)
                .arg(&id)
                .query_async(con)
                .await?;
            // 다른 러너가 먼저 승격한 경우 건너뜁니다.
            if removed > 0 {
                let _: () = redis::cmd("LPUSH")
                    .arg(&keys.wait)
                    .arg(&id)
                    .query_async(con)
                    .await?;
            }
        }
        Ok(())
    }

    /// 완료 잡을 기록하고 보존 정책(1시간/100개)을 적용합니다.
    async fn record_completed(
        keys: &KeySet,
        con: &mut ConnectionManager,
        job_id: &str,
        dedup_key: Option<&str>,
    ) -> Result<(), redis::RedisError> {
        let _: () = redis::cmd("LREM")
            .arg(&keys.active)
            .arg(1)
            .arg(job_id)
            .query_async(con)
            .await?;
        let _: () = redis::cmd("DEL")
            .arg(keys.job(job_id))
            .query_async(con)
            .await?;
        if let Some(key) = dedup_key {
            let _: () = redis::cmd("DEL")
                .arg(keys.dedup(key))
                .query_async(con)
                .await?;
        }
        let _: () = redis::cmd("ZADD")
            .arg(&keys.completed)
            .arg(now_ms())
            .arg(job_id)
            .query_async(con)
            .await?;
        Self::prune(con, &keys.completed, COMPLETED_RETENTION, COMPLETED_KEEP).await
    }

    /// 최종 실패 잡을 기록하고 보존 정책(24시간/50개)을 적용합니다.
    async fn record_failed(
        keys: &KeySet,
        con: &mut ConnectionManager,
        job_id: &str,
        dedup_key: Option<&str>,
    ) -> Result<(), redis::RedisError> {
        let _: () = redis::cmd("LREM")
            .arg(&keys.active)
            .arg(1)
            .arg(job_id)
            .query_async(con)
            .await?;
        let _: () = redis::cmd("DEL")
            .arg(keys.job(job_id))
            .query_async(con)
            .await?;
        if let Some(key) = dedup_key {
            let _: () = redis::cmd("DEL")
                .arg(keys.dedup(key))
                .query_async(con)
                .await?;
        }
        let _: () = redis::cmd("ZADD")
            .arg(&keys.failed)
            .arg(now_ms())
            .arg(job_id)
            .query_async(con)
            .await?;
        Self::prune(con, &keys.failed, FAILED_RETENTION, FAILED_KEEP).await
    }

    /// 실패 잡을 backoff 후 재시도하도록 지연 집합으로 되돌립니다.
    async fn reschedule(
        keys: &KeySet,
        con: &mut ConnectionManager,
        envelope: &KvJobEnvelope,
    ) -> Result<(), redis::RedisError> {
        let body = serde_json::to_string(envelope).unwrap_or_default();
        let _: () = redis::cmd("SET")
            .arg(keys.job(&envelope.job.id))
            .arg(body)
            .query_async(con)
            .await?;
        let run_at = now_ms() + job_retry_backoff_ms(envelope.job.attempts) as i64;
        let _: () = redis::cmd("ZADD")
            .arg(&keys.delayed)
            .arg(run_at)
            .arg(&envelope.job.id)
            .query_async(con)
            .await?;
        let _: () = redis::cmd("LREM")
            .arg(&keys.active)
            .arg(1)
            .arg(&envelope.job.id)
            .query_async(con)
            .await?;
        Ok(())
    }

    /// 정렬집합을 시간과 개수 기준으로 정리합니다.
    async fn prune(
        con: &mut ConnectionManager,
        key: &str,
        retention: Duration,
        keep: usize,
    ) -> Result<(), redis::RedisError> {
        let cutoff = now_ms() - retention.as_millis() as i64;
        let _: () = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .query_async(con)
            .await?;
        let _: () = redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(0)
            .arg(-(keep as i64 + 1))
            .query_async(con)
            .await?;
        Ok(())
    }

    async fn run_loop(
        queue_name: String,
        keys: KeySet,
        manager: ConnectionManager,
        processor: JobProcessor,
        events: mpsc::Sender<WorkerEvent>,
        concurrency: usize,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut con = manager.clone();
        let mut reconnect_attempt: u32 = 0;

        tracing::info!(queue = %queue_name, concurrency, "kv queue worker started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = cancel.cancelled() => break,
            }

            if let Err(e) = Self::promote_delayed(&keys, &mut con).await {
                if is_transient(&e) {
                    reconnect_attempt += 1;
                    let delay = connect_backoff(reconnect_attempt);
                    tracing::warn!(
                        queue = %queue_name,
                        attempt = reconnect_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient kv error, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => break,
                    }
                } else {
                    tracing::error!(queue = %queue_name, error = %e, "kv queue error");
                    let _ = events.try_send(WorkerEvent::Error(e.to_string()));
                }
                continue;
            }
            reconnect_attempt = 0;

            loop {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };

                let claimed: Result<Option<String>, redis::RedisError> = redis::cmd("LMOVE")
                    .arg(&keys.wait)
                    .arg(&keys.active)
                    .arg("RIGHT")
                    .arg("LEFT")
                    .query_async(&mut con)
                    .await;

                let job_id = match claimed {
                    Ok(Some(id)) => id,
                    Ok(None) => break,
                    Err(e) => {
                        if !is_transient(&e) {
                            let _ = events.try_send(WorkerEvent::Error(e.to_string()));
                        }
                        tracing::warn!(queue = %queue_name, error = %e, "failed to claim kv job");
                        break;
                    }
                };

                let body: Option<String> = match redis::cmd("GET")
                    .arg(keys.job(&job_id))
                    .query_async(&mut con)
                    .await
                {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "failed to load kv job body");
                        None
                    }
                };

                let Some(body) = body else {
                    // 본문이 없는 고아 ID는 active에서 제거만 합니다.
                    let _: Result<(), _> = redis::cmd("LREM")
                        .arg(&keys.active)
                        .arg(1)
                        .arg(&job_id)
                        .query_async(&mut con)
                        .await;
                    continue;
                };

                let envelope: KvJobEnvelope = match serde_json::from_str(&body) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "malformed kv job body, dropping");
                        let _ = Self::record_failed(&keys, &mut con, &job_id, None).await;
                        continue;
                    }
                };

                let keys = keys.clone();
                let mut con_task = manager.clone();
                let processor = Arc::clone(&processor);
                let events = events.clone();
                let queue_name = queue_name.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    let mut envelope = envelope;
                    let dedup = envelope.dedup_key.clone();
                    let job = envelope.job.clone();

                    match processor(job.clone()).await {
                        Ok(()) => {
                            if let Err(e) =
                                Self::record_completed(&keys, &mut con_task, &job.id, dedup.as_deref())
                                    .await
                            {
                                tracing::error!(job_id = %job.id, error = %e, "failed to record completion");
                            }
                            metrics::counter!(
                                logward_core::metrics::QUEUE_JOBS_COMPLETED_TOTAL,
                                logward_core::metrics::LABEL_QUEUE => queue_name.clone()
                            )
                            .increment(1);
                            let _ = events.send(WorkerEvent::Completed(job)).await;
                        }
                        Err(process_err) => {
                            envelope.job.attempts += 1;
                            if envelope.job.attempts >= envelope.job.max_attempts {
                                tracing::warn!(
                                    job_id = %job.id,
                                    attempts = envelope.job.attempts,
                                    error = %process_err,
                                    "kv job exhausted attempts"
                                );
                                if let Err(e) = Self::record_failed(
                                    &keys,
                                    &mut con_task,
                                    &job.id,
                                    dedup.as_deref(),
                                )
                                .await
                                {
                                    tracing::error!(job_id = %job.id, error = %e, "failed to record failure");
                                }
                                metrics::counter!(
                                    logward_core::metrics::QUEUE_JOBS_FAILED_TOTAL,
                                    logward_core::metrics::LABEL_QUEUE => queue_name.clone()
                                )
                                .increment(1);
                                let _ = events
                                    .send(WorkerEvent::Failed(
                                        envelope.job.clone(),
                                        process_err.to_string(),
                                    ))
                                    .await;
                            } else if let Err(e) =
                                Self::reschedule(&keys, &mut con_task, &envelope).await
                            {
                                tracing::error!(job_id = %job.id, error = %e, "failed to reschedule kv job");
                                let _ = events.try_send(WorkerEvent::Error(e.to_string()));
                            }
                        }
                    }
                });
            }
        }

        // 진행 중인 잡 완료 대기
        let _ = semaphore.acquire_many(concurrency as u32).await;
        tracing::info!(queue = %queue_name, "kv queue worker stopped");
    }
}

impl Worker for KvWorker {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn start(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            let mut task = self.task.lock().await;
            if task.is_some() {
                return Ok(());
            }
            let handle = tokio::spawn(Self::run_loop(
                self.queue_name.clone(),
                self.keys.clone(),
                self.manager.clone(),
                Arc::clone(&self.processor),
                self.events.clone(),
                self.concurrency,
                self.poll_interval,
                self.cancel.clone(),
            ));
            *task = Some(handle);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.cancel.cancel();
            let mut task = self.task.lock().await;
            if let Some(handle) = task.take() {
                let _ = handle.await;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_set_layout() {
        let keys = KeySet::new("detection-scan");
        assert_eq!(keys.wait, "logward:detection-scan:wait");
        assert_eq!(keys.active, "logward:detection-scan:active");
        assert_eq!(keys.delayed, "logward:detection-scan:delayed");
        assert_eq!(keys.completed, "logward:detection-scan:completed");
        assert_eq!(keys.failed, "logward:detection-scan:failed");
        assert_eq!(keys.job("abc"), "logward:detection-scan:job:abc");
        assert_eq!(keys.dedup("k1"), "logward:detection-scan:dedup:k1");
    }

    #[test]
    fn transient_errors_are_recognized() {
        let io_err = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(is_transient(&io_err));

        let readonly = redis::RedisError::from((
            redis::ErrorKind::ReadOnly,
            "READONLY You can't write against a read only replica",
        ));
        assert!(is_transient(&readonly));

        let type_err = redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(!is_transient(&type_err));
    }

    #[test]
    fn envelope_roundtrip_preserves_options() {
        let envelope = KvJobEnvelope {
            job: Job {
                id: "id-1".to_owned(),
                name: "scan-logs".to_owned(),
                payload: serde_json::json!({"logIds": ["a"]}),
                attempts: 2,
                max_attempts: 3,
            },
            priority: -1,
            dedup_key: Some("batch-9".to_owned()),
        };
        let body = serde_json::to_string(&envelope).unwrap();
        let parsed: KvJobEnvelope = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.job.id, "id-1");
        assert_eq!(parsed.job.attempts, 2);
        assert_eq!(parsed.priority, -1);
        assert_eq!(parsed.dedup_key.as_deref(), Some("batch-9"));
    }

    #[test]
    fn retention_constants_match_policy() {
        assert_eq!(COMPLETED_RETENTION, Duration::from_secs(3600));
        assert_eq!(COMPLETED_KEEP, 100);
        assert_eq!(FAILED_RETENTION, Duration::from_secs(86400));
        assert_eq!(FAILED_KEEP, 50);
    }
}
