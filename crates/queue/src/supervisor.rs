//! 큐 슈퍼바이저 -- 백엔드 선택, 인스턴스 캐싱, 생명주기 관리
//!
//! 프로세스당 한 번 생성되어 합성 루트(`logward-daemon`)에서
//! 모든 컴포넌트에 전달됩니다. 전역 가변 상태 대신 명시적 컨텍스트
//! 객체로 프로세스 전역 유일성을 보장합니다.
//!
//! # 생명주기
//! ```text
//! new() -> queue()/worker() 캐싱 -> start() (인DB 러너 기동)
//!       -> status() -> shutdown() (워커 -> 큐 -> 연결 순서로 정리)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::{Mutex, mpsc};

use logward_core::config::{LogwardConfig, QueueBackend};
use logward_core::error::QueueError;
use logward_core::job::{JobProcessor, Queue, QueueCounts, Worker, WorkerEvent};

use crate::db::{self, DbQueue, DbWorker};
use crate::kv::{KvQueue, KvWorker};

/// 슈퍼바이저 내부 상태
///
/// 캐시와 연결은 모두 단일 뮤텍스 아래에서 변경됩니다 (single-writer).
struct SupervisorState {
    started: bool,
    shut_down: bool,
    pool: Option<PgPool>,
    kv: Option<ConnectionManager>,
    queues: HashMap<String, Arc<dyn Queue>>,
    workers: HashMap<String, Arc<dyn Worker>>,
}

/// 큐 슈퍼바이저
///
/// 동일한 이름으로 큐/워커를 재요청하면 캐시된 인스턴스를 반환합니다.
/// 반복된 워커 요청의 프로세서 인자는 무시됩니다.
pub struct QueueSupervisor {
    backend: QueueBackend,
    db_url: String,
    kv_url: Option<String>,
    pool_size: u32,
    worker_concurrency: usize,
    poll_interval: Duration,
    state: Mutex<SupervisorState>,
}

impl QueueSupervisor {
    /// 설정에서 슈퍼바이저를 생성합니다.
    ///
    /// 연결은 지연 생성되므로 이 함수는 네트워크를 사용하지 않습니다.
    pub fn new(config: &LogwardConfig) -> Self {
        Self {
            backend: config.queue.backend,
            db_url: config.storage.db_url.clone(),
            kv_url: config.storage.kv_url.clone(),
            pool_size: config.storage.pool_size,
            worker_concurrency: config.queue.worker_concurrency,
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
            state: Mutex::new(SupervisorState {
                started: false,
                shut_down: false,
                pool: None,
                kv: None,
                queues: HashMap::new(),
                workers: HashMap::new(),
            }),
        }
    }

    /// 선택된 백엔드를 반환합니다.
    pub fn backend(&self) -> QueueBackend {
        self.backend
    }

    /// 큐 전용 커넥션 풀을 가져오거나 생성합니다.
    fn pool_for(state: &mut SupervisorState, db_url: &str, pool_size: u32) -> Result<PgPool, QueueError> {
        if let Some(ref pool) = state.pool {
            return Ok(pool.clone());
        }
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect_lazy(db_url)
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        state.pool = Some(pool.clone());
        Ok(pool)
    }

    /// KV 연결 관리자를 가져오거나 생성합니다 (프로세스당 1개).
    async fn kv_for(
        state: &mut SupervisorState,
        kv_url: Option<&str>,
    ) -> Result<ConnectionManager, QueueError> {
        if let Some(ref manager) = state.kv {
            return Ok(manager.clone());
        }
        let url = kv_url.ok_or_else(|| {
            QueueError::Connection("kv_url is required for the kv-store backend".to_owned())
        })?;
        let client = redis::Client::open(url)
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        state.kv = Some(manager.clone());
        Ok(manager)
    }

    /// 이름으로 큐를 가져옵니다. 없으면 생성하여 캐시합니다.
    pub async fn queue(&self, name: &str) -> Result<Arc<dyn Queue>, QueueError> {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Err(QueueError::Closed("supervisor shut down".to_owned()));
        }
        if let Some(queue) = state.queues.get(name) {
            return Ok(Arc::clone(queue));
        }

        let queue: Arc<dyn Queue> = match self.backend {
            QueueBackend::InDb => {
                let pool = Self::pool_for(&mut state, &self.db_url, self.pool_size)?;
                Arc::new(DbQueue::new(name, pool))
            }
            QueueBackend::KvStore => {
                let manager = Self::kv_for(&mut state, self.kv_url.as_deref()).await?;
                Arc::new(KvQueue::new(name, manager))
            }
        };

        state.queues.insert(name.to_owned(), Arc::clone(&queue));
        tracing::debug!(queue = name, backend = ?self.backend, "queue created");
        Ok(queue)
    }

    /// 이름으로 워커를 가져옵니다. 없으면 생성하여 캐시합니다.
    ///
    /// 이미 등록된 이름이면 `processor`와 `events`는 무시되고
    /// 캐시된 워커가 반환됩니다. 슈퍼바이저가 시작된 상태라면 새 워커는
    /// 즉시 기동됩니다.
    pub async fn worker(
        &self,
        name: &str,
        processor: JobProcessor,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Arc<dyn Worker>, QueueError> {
        let (worker, start_now) = {
            let mut state = self.state.lock().await;
            if state.shut_down {
                return Err(QueueError::Closed("supervisor shut down".to_owned()));
            }
            if let Some(worker) = state.workers.get(name) {
                return Ok(Arc::clone(worker));
            }

            let worker: Arc<dyn Worker> = match self.backend {
                QueueBackend::InDb => {
                    let pool = Self::pool_for(&mut state, &self.db_url, self.pool_size)?;
                    Arc::new(DbWorker::new(
                        name,
                        pool,
                        processor,
                        events,
                        self.worker_concurrency,
                        self.poll_interval,
                    ))
                }
                QueueBackend::KvStore => {
                    let manager = Self::kv_for(&mut state, self.kv_url.as_deref()).await?;
                    Arc::new(KvWorker::new(
                        name,
                        manager,
                        processor,
                        events,
                        self.worker_concurrency,
                        self.poll_interval,
                    ))
                }
            };

            state.workers.insert(name.to_owned(), Arc::clone(&worker));
            tracing::debug!(worker = name, backend = ?self.backend, "worker created");
            (worker, state.started)
        };

        if start_now {
            worker.start().await?;
        }
        Ok(worker)
    }

    /// 슈퍼바이저를 시작합니다. 중복 호출은 무시됩니다.
    ///
    /// 인DB 백엔드는 여기서 잡 테이블 스키마를 보장하고
    /// 등록된 러너를 기동합니다.
    pub async fn start(&self) -> Result<(), QueueError> {
        let workers: Vec<Arc<dyn Worker>> = {
            let mut state = self.state.lock().await;
            if state.started || state.shut_down {
                return Ok(());
            }

            if self.backend == QueueBackend::InDb {
                let pool = Self::pool_for(&mut state, &self.db_url, self.pool_size)?;
                db::ensure_schema(&pool).await?;
            }

            state.started = true;
            state.workers.values().cloned().collect()
        };

        for worker in workers {
            worker.start().await?;
        }
        tracing::info!(backend = ?self.backend, "queue supervisor started");
        Ok(())
    }

    /// 캐시된 모든 큐의 상태 카운터를 반환합니다.
    pub async fn status(&self) -> HashMap<String, QueueCounts> {
        let queues: Vec<(String, Arc<dyn Queue>)> = {
            let state = self.state.lock().await;
            state
                .queues
                .iter()
                .map(|(name, queue)| (name.clone(), Arc::clone(queue)))
                .collect()
        };

        let mut statuses = HashMap::new();
        for (name, queue) in queues {
            match queue.counts().await {
                Ok(counts) => {
                    metrics::gauge!(
                        logward_core::metrics::QUEUE_DEPTH,
                        logward_core::metrics::LABEL_QUEUE => name.clone()
                    )
                    .set(counts.waiting as f64);
                    statuses.insert(name, counts);
                }
                Err(e) => {
                    tracing::warn!(queue = %name, error = %e, "failed to read queue counts");
                    statuses.insert(name, QueueCounts::default());
                }
            }
        }
        statuses
    }

    /// 슈퍼바이저를 종료합니다.
    ///
    /// 워커 -> 큐 -> 기반 연결 순서로 닫고 캐시를 비웁니다.
    /// 여러 번 호출해도 안전하며, 아무것도 초기화되지 않았어도
    /// 블로킹하지 않습니다.
    pub async fn shutdown(&self) {
        let (workers, queues, pool) = {
            let mut state = self.state.lock().await;
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.started = false;
            let workers: Vec<_> = state.workers.drain().map(|(_, w)| w).collect();
            let queues: Vec<_> = state.queues.drain().map(|(_, q)| q).collect();
            let pool = state.pool.take();
            state.kv = None;
            (workers, queues, pool)
        };

        for worker in workers {
            if let Err(e) = worker.close().await {
                tracing::warn!(worker = worker.queue_name(), error = %e, "worker close failed");
            }
        }
        for queue in queues {
            if let Err(e) = queue.close().await {
                tracing::warn!(queue = queue.name(), error = %e, "queue close failed");
            }
        }
        if let Some(pool) = pool {
            pool.close().await;
        }

        tracing::info!("queue supervisor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logward_core::config::StorageConfig;
    use std::sync::Arc;

    fn test_config() -> LogwardConfig {
        LogwardConfig {
            storage: StorageConfig {
                db_url: "postgres://localhost/logward_test".to_owned(),
                kv_url: None,
                pool_size: 2,
            },
            ..Default::default()
        }
    }

    fn noop_processor() -> JobProcessor {
        Arc::new(|_job| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn queue_requests_are_cached_by_name() {
        let supervisor = QueueSupervisor::new(&test_config());

        let first = supervisor.queue("detection-scan").await.unwrap();
        let second = supervisor.queue("detection-scan").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = supervisor.queue("other").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn repeated_worker_request_ignores_new_processor() {
        let supervisor = QueueSupervisor::new(&test_config());
        let (tx, _rx) = mpsc::channel(8);

        let first = supervisor
            .worker("detection-scan", noop_processor(), tx.clone())
            .await
            .unwrap();
        let second = supervisor
            .worker(
                "detection-scan",
                Arc::new(|_job| {
                    Box::pin(async { Err(QueueError::Processing("never used".to_owned())) })
                }),
                tx,
            )
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_safe_without_start() {
        let supervisor = QueueSupervisor::new(&test_config());
        let _ = supervisor.queue("detection-scan").await.unwrap();

        supervisor.shutdown().await;
        supervisor.shutdown().await;

        // 종료 후 캐시는 비워지고 새 요청은 거부됩니다.
        let result = supervisor.queue("detection-scan").await;
        assert!(matches!(result, Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn status_on_empty_supervisor_returns_empty_map() {
        let supervisor = QueueSupervisor::new(&test_config());
        let statuses = supervisor.status().await;
        assert!(statuses.is_empty());
    }
}
