//! 인DB 큐 백엔드 -- 기본 스토어의 잡 테이블을 폴링합니다.
//!
//! 전용 스키마의 `logward_jobs` 테이블에 잡을 저장합니다.
//! 등록은 INSERT, 점유는 `FOR UPDATE SKIP LOCKED`, 완료는 DELETE,
//! 실패는 `locked_at` 해제 + `attempts` 증가 + backoff만큼 `run_at` 미루기입니다.
//!
//! 프로세스당 하나의 러너가 1초 이상의 간격으로 폴링하며,
//! 세마포어로 동시 실행 수를 제한합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use logward_core::error::QueueError;
use logward_core::job::{BoxFuture, Job, JobOptions, JobProcessor, Queue, QueueCounts, Worker, WorkerEvent};

use crate::backoff::job_retry_backoff_ms;

/// 잡 테이블 스키마를 생성합니다 (존재하면 무시).
///
/// 부분 유니크 인덱스 `(queue, key) WHERE key IS NOT NULL`로
/// 중복 제거 키의 "살아있는 잡 최대 1개" 불변식을 강제합니다.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), QueueError> {
    const DDL: &[&str] = &[
        r"CREATE TABLE IF NOT EXISTS logward_jobs (
            id              TEXT PRIMARY KEY,
            queue           TEXT NOT NULL,
            task_identifier TEXT NOT NULL,
            payload         JSONB NOT NULL,
            run_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
            attempts        INT NOT NULL DEFAULT 0,
            max_attempts    INT NOT NULL DEFAULT 3,
            locked_at       TIMESTAMPTZ,
            priority        INT NOT NULL DEFAULT 0,
            key             TEXT,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        r"CREATE UNIQUE INDEX IF NOT EXISTS logward_jobs_queue_key_idx
            ON logward_jobs (queue, key) WHERE key IS NOT NULL",
        r"CREATE INDEX IF NOT EXISTS logward_jobs_poll_idx
            ON logward_jobs (queue, priority, run_at) WHERE locked_at IS NULL",
    ];

    for statement in DDL {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
    }
    Ok(())
}

/// 인DB 큐
///
/// [`Queue`] trait 구현. 등록과 카운터 조회만 담당하며,
/// 잡 실행은 [`DbWorker`]가 수행합니다.
pub struct DbQueue {
    name: String,
    pool: PgPool,
    closed: AtomicBool,
}

impl DbQueue {
    /// 새 인DB 큐를 생성합니다.
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
            closed: AtomicBool::new(false),
        }
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

        let id = uuid::Uuid::new_v4().to_string();
        let delay_ms = i64::try_from(options.delay_ms).unwrap_or(i64::MAX);

        // 중복 제거 키가 지정된 경우, 부분 유니크 인덱스와의 충돌은
        // "이미 살아있는 잡이 있음"을 의미하므로 기존 잡을 반환합니다.
        let inserted = sqlx::query(
            r"INSERT INTO logward_jobs
                (id, queue, task_identifier, payload, run_at, attempts, max_attempts, priority, key)
              VALUES
                ($1, $2, $3, $4, now() + ($5::bigint * interval '1 millisecond'), 0, $6, $7, $8)
              ON CONFLICT (queue, key) WHERE key IS NOT NULL DO NOTHING
              RETURNING id",
        )
        .bind(&id)
        .bind(&self.name)
        .bind(job_name)
        .bind(&payload)
        .bind(delay_ms)
        .bind(options.max_attempts as i32)
        .bind(options.priority)
        .bind(options.dedup_key.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Enqueue(e.to_string()))?;

        if inserted.is_some() {
            metrics::counter!(
                logward_core::metrics::QUEUE_JOBS_ENQUEUED_TOTAL,
                logward_core::metrics::LABEL_QUEUE => self.name.clone()
            )
            .increment(1);

            return Ok(Job {
                id,
                name: job_name.to_owned(),
                payload,
                attempts: 0,
                max_attempts: options.max_attempts,
            });
        }

        // 충돌: 동일 키의 살아있는 잡을 조회합니다.
        let key = options
            .dedup_key
            .as_deref()
            .ok_or_else(|| QueueError::Enqueue("insert returned no row without key".to_owned()))?;

        let row = sqlx::query(
            r"SELECT id, task_identifier, payload, attempts, max_attempts
              FROM logward_jobs WHERE queue = $1 AND key = $2",
        )
        .bind(&self.name)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Enqueue(e.to_string()))?;

        match row {
            Some(row) => Ok(Job {
                id: row.try_get("id").map_err(|e| QueueError::Payload(e.to_string()))?,
                name: row
                    .try_get("task_identifier")
                    .map_err(|e| QueueError::Payload(e.to_string()))?,
                payload: row
                    .try_get("payload")
                    .map_err(|e| QueueError::Payload(e.to_string()))?,
                attempts: row
                    .try_get::<i32, _>("attempts")
                    .map_err(|e| QueueError::Payload(e.to_string()))? as u32,
                max_attempts: row
                    .try_get::<i32, _>("max_attempts")
                    .map_err(|e| QueueError::Payload(e.to_string()))? as u32,
            }),
            // 조회 전에 기존 잡이 완료되어 삭제된 경우. 호출자가 재시도합니다.
            None => Err(QueueError::Enqueue(
                "deduplicated job completed concurrently, retry enqueue".to_owned(),
            )),
        }
    }

    async fn counts_inner(&self) -> Result<QueueCounts, QueueError> {
        let row = sqlx::query(
            r"SELECT
                COUNT(*) FILTER (WHERE locked_at IS NULL AND run_at <= now()
                                   AND attempts < max_attempts)        AS waiting,
                COUNT(*) FILTER (WHERE locked_at IS NOT NULL)          AS active,
                COUNT(*) FILTER (WHERE attempts >= max_attempts)       AS failed
              FROM logward_jobs WHERE queue = $1",
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Connection(e.to_string()))?;

        let get = |name: &str| -> Result<u64, QueueError> {
            row.try_get::<i64, _>(name)
                .map(|v| v.max(0) as u64)
                .map_err(|e| QueueError::Payload(e.to_string()))
        };

        Ok(QueueCounts {
            waiting: get("waiting")?,
            active: get("active")?,
            // 완료된 잡 행은 삭제되므로 SQL로는 유지하지 않습니다.
            completed: 0,
            failed: get("failed")?,
        })
    }
}

impl Queue for DbQueue {
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

/// 인DB 큐 러너 (워커)
///
/// 폴링 간격마다 실행 가능한 잡을 점유하여 프로세서를 실행합니다.
/// 동시 실행 수는 세마포어로 제한됩니다.
pub struct DbWorker {
    queue_name: String,
    pool: PgPool,
    processor: JobProcessor,
    events: mpsc::Sender<WorkerEvent>,
    concurrency: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// 프로세스 로컬 완료 카운터 — 잡 행은 삭제되므로 여기서만 관측됩니다.
    completed_count: Arc<AtomicU64>,
}

impl DbWorker {
    /// 새 러너를 생성합니다. [`Worker::start`] 전에는 폴링하지 않습니다.
    pub fn new(
        queue_name: impl Into<String>,
        pool: PgPool,
        processor: JobProcessor,
        events: mpsc::Sender<WorkerEvent>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            pool,
            processor,
            events,
            concurrency: concurrency.max(1),
            // 폴링 간격 하한 1초
            poll_interval: poll_interval.max(Duration::from_secs(1)),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
            completed_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 이 러너가 지금까지 완료한 잡 수를 반환합니다.
    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    /// 다음 실행 가능한 잡 하나를 점유합니다.
    ///
    /// `FOR UPDATE SKIP LOCKED`로 동시 러너 간 경합 없이 행을 잠그고
    /// `locked_at`을 기록합니다.
    async fn claim_next(pool: &PgPool, queue: &str) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query(
            r"WITH next AS (
                SELECT id FROM logward_jobs
                WHERE queue = $1
                  AND locked_at IS NULL
                  AND run_at <= now()
                  AND attempts < max_attempts
                ORDER BY priority ASC, run_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
              )
              UPDATE logward_jobs j
              SET locked_at = now()
              FROM next
              WHERE j.id = next.id
              RETURNING j.id, j.task_identifier, j.payload, j.attempts, j.max_attempts",
        )
        .bind(queue)
        .fetch_optional(pool)
        .await
        .map_err(|e| QueueError::Connection(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };

        Ok(Some(Job {
            id: row.try_get("id").map_err(|e| QueueError::Payload(e.to_string()))?,
            name: row
                .try_get("task_identifier")
                .map_err(|e| QueueError::Payload(e.to_string()))?,
            payload: row
                .try_get("payload")
                .map_err(|e| QueueError::Payload(e.to_string()))?,
            attempts: row
                .try_get::<i32, _>("attempts")
                .map_err(|e| QueueError::Payload(e.to_string()))? as u32,
            max_attempts: row
                .try_get::<i32, _>("max_attempts")
                .map_err(|e| QueueError::Payload(e.to_string()))? as u32,
        }))
    }

    /// 완료된 잡 행을 삭제합니다.
    async fn complete_job(pool: &PgPool, job_id: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM logward_jobs WHERE id = $1")
            .bind(job_id)
            .execute(pool)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(())
    }

    /// 실패한 잡의 점유를 해제하고 backoff만큼 재실행을 미룹니다.
    ///
    /// 증가된 시도 횟수를 반환합니다.
    async fn fail_job(pool: &PgPool, job_id: &str, attempts: u32) -> Result<u32, QueueError> {
        let next_attempts = attempts + 1;
        let backoff_ms = job_retry_backoff_ms(next_attempts) as i64;

        sqlx::query(
            r"UPDATE logward_jobs
              SET locked_at = NULL,
                  attempts = $2,
                  run_at = now() + ($3::bigint * interval '1 millisecond')
              WHERE id = $1",
        )
        .bind(job_id)
        .bind(next_attempts as i32)
        .bind(backoff_ms)
        .execute(pool)
        .await
        .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(next_attempts)
    }

    async fn run_loop(
        queue_name: String,
        pool: PgPool,
        processor: JobProcessor,
        events: mpsc::Sender<WorkerEvent>,
        concurrency: usize,
        poll_interval: Duration,
        cancel: CancellationToken,
        completed_count: Arc<AtomicU64>,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(queue = %queue_name, concurrency, "db queue runner started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            // 여유 슬롯이 있는 동안 잡을 계속 점유합니다.
            loop {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };

                let job = match Self::claim_next(&pool, &queue_name).await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(queue = %queue_name, error = %e, "failed to claim job");
                        let _ = events.try_send(WorkerEvent::Error(e.to_string()));
                        break;
                    }
                };

                let pool = pool.clone();
                let processor = Arc::clone(&processor);
                let events = events.clone();
                let queue_name = queue_name.clone();
                let completed_count = Arc::clone(&completed_count);

                tokio::spawn(async move {
                    let _permit = permit;
                    let result = processor(job.clone()).await;

                    match result {
                        Ok(()) => {
                            if let Err(e) = Self::complete_job(&pool, &job.id).await {
                                tracing::error!(job_id = %job.id, error = %e, "failed to delete completed job");
                            }
                            completed_count.fetch_add(1, Ordering::Relaxed);
                            metrics::counter!(
                                logward_core::metrics::QUEUE_JOBS_COMPLETED_TOTAL,
                                logward_core::metrics::LABEL_QUEUE => queue_name.clone()
                            )
                            .increment(1);
                            let _ = events.send(WorkerEvent::Completed(job)).await;
                        }
                        Err(process_err) => {
                            match Self::fail_job(&pool, &job.id, job.attempts).await {
                                Ok(next_attempts) if next_attempts >= job.max_attempts => {
                                    tracing::warn!(
                                        job_id = %job.id,
                                        attempts = next_attempts,
                                        error = %process_err,
                                        "job exhausted attempts"
                                    );
                                    metrics::counter!(
                                        logward_core::metrics::QUEUE_JOBS_FAILED_TOTAL,
                                        logward_core::metrics::LABEL_QUEUE => queue_name.clone()
                                    )
                                    .increment(1);
                                    let mut failed = job;
                                    failed.attempts = next_attempts;
                                    let _ = events
                                        .send(WorkerEvent::Failed(failed, process_err.to_string()))
                                        .await;
                                }
                                Ok(next_attempts) => {
                                    tracing::debug!(
                                        job_id = %job.id,
                                        attempts = next_attempts,
                                        error = %process_err,
                                        "job failed, scheduled for retry"
                                    );
                                }
                                Err(e) => {
                                    tracing::error!(job_id = %job.id, error = %e, "failed to reschedule job");
                                    let _ = events.try_send(WorkerEvent::Error(e.to_string()));
                                }
                            }
                        }
                    }
                });
            }
        }

        // 진행 중인 잡 완료 대기 (모든 permit 회수)
        let _ = semaphore.acquire_many(concurrency as u32).await;
        tracing::info!(queue = %queue_name, "db queue runner stopped");
    }
}

impl Worker for DbWorker {
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
                self.pool.clone(),
                Arc::clone(&self.processor),
                self.events.clone(),
                self.concurrency,
                self.poll_interval,
                self.cancel.clone(),
                Arc::clone(&self.completed_count),
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
