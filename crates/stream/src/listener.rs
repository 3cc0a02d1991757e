//! 알림 리스너 -- 단일 장기 연결의 LISTEN과 재연결 상태 기계
//!
//! 프로세스당 하나의 전용 연결로 알림 채널을 LISTEN합니다.
//!
//! # 상태 기계
//! ```text
//! disconnected -> connecting -> listening -> (에러 시 disconnected)
//! ```
//!
//! 종료 중이 아닐 때 disconnected로 전환되면
//! `min(1000 * 2^(attempt-1), 30000)` ms의 지수 backoff로 재연결을
//! 예약합니다. 최대 시도 횟수를 넘으면 포기하고 종단 에러 이벤트를
//! 발행합니다. 재연결 성공 시 시도 횟수는 리셋되고 LISTEN이 다시
//! 실행되며, 기존 구독자는 그대로 유지됩니다.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use sqlx::postgres::{PgListener, PgNotification};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use logward_core::error::StreamError;
use logward_core::types::LogNotification;

use crate::registry::{DeliveryCallback, SubscriberFilter, SubscriberRegistry};

/// 재연결 backoff 상한
const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// 재연결 backoff를 계산합니다: `min(1000 * 2^(attempt-1), 30000)` ms.
pub fn reconnect_backoff(attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let exponent = (attempt - 1).min(31);
    Duration::from_millis(1000)
        .checked_mul(1u32 << exponent.min(15))
        .unwrap_or(RECONNECT_CAP)
        .min(RECONNECT_CAP)
}

/// 리스너 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    /// 연결 안 됨
    Disconnected,
    /// 연결 시도 중
    Connecting,
    /// LISTEN 수행 중
    Listening,
    /// 종료됨
    ShutDown,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::ShutDown => write!(f, "shut_down"),
        }
    }
}

/// 리스너 상태 스냅샷
#[derive(Debug, Clone, serde::Serialize)]
pub struct ListenerStatus {
    /// 현재 상태
    pub state: ListenerState,
    /// 현재 재연결 시도 횟수 (성공 시 0으로 리셋)
    pub reconnect_attempts: u32,
    /// 등록된 구독자 수
    pub subscribers: usize,
}

/// 리스너가 발행하는 이벤트
#[derive(Debug)]
pub enum ListenerEvent {
    /// 재연결 시도 한도를 초과하여 포기함 — 운영자 개입 필요
    TerminalFailure(StreamError),
}

/// 리스너 공유 상태
struct ListenerShared {
    registry: Arc<SubscriberRegistry>,
    state: std::sync::RwLock<ListenerState>,
    attempts: AtomicU32,
    cancel: CancellationToken,
    channel: String,
    max_reconnect_attempts: u32,
}

impl ListenerShared {
    fn set_state(&self, state: ListenerState) {
        *self.state.write().expect("listener state poisoned") = state;
    }

    fn state(&self) -> ListenerState {
        *self.state.read().expect("listener state poisoned")
    }

    /// 수신한 알림 하나를 구독자들에게 팬아웃합니다.
    ///
    /// 다른 채널의 메시지와 잘못된 페이로드는 로그만 남기고 무시합니다.
    /// 구독자 콜백은 병렬로 실행되며 개별 에러는 격리됩니다.
    fn handle_notification(&self, notification: &PgNotification) {
        if notification.channel() != self.channel {
            tracing::debug!(
                channel = notification.channel(),
                "ignoring notification on unexpected channel"
            );
            return;
        }

        let parsed: LogNotification = match serde_json::from_str(notification.payload()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload_len = notification.payload().len(),
                    "ignoring malformed notification payload"
                );
                return;
            }
        };

        metrics::counter!(logward_core::metrics::LISTENER_NOTIFICATIONS_TOTAL).increment(1);

        let subscribers = self.registry.snapshot_for_project(&parsed.project_id);
        if subscribers.is_empty() {
            return;
        }

        tracing::debug!(
            project_id = %parsed.project_id,
            ids = parsed.log_ids.len(),
            subscribers = subscribers.len(),
            "dispatching notification"
        );

        for subscriber in subscribers {
            let notification = parsed.clone();
            tokio::spawn(async move {
                if let Err(e) = (subscriber.deliver)(notification).await {
                    tracing::warn!(
                        subscriber_id = %subscriber.id,
                        error = %e,
                        "subscriber callback failed"
                    );
                }
            });
        }
    }
}

/// 알림 리스너
///
/// 합성 루트에서 프로세스당 하나만 생성합니다.
pub struct NotifyListener {
    shared: Arc<ListenerShared>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NotifyListener {
    /// 새 리스너를 생성합니다. [`NotifyListener::initialize`] 전에는
    /// 연결하지 않습니다.
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        channel: impl Into<String>,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            shared: Arc::new(ListenerShared {
                registry,
                state: std::sync::RwLock::new(ListenerState::Disconnected),
                attempts: AtomicU32::new(0),
                cancel: CancellationToken::new(),
                channel: channel.into(),
                max_reconnect_attempts,
            }),
            task: Mutex::new(None),
        }
    }

    /// 리스너 태스크를 시작합니다.
    ///
    /// 반환된 수신기로 종단 실패 이벤트를 관찰할 수 있습니다.
    /// 중복 호출은 기존 태스크를 유지한 채 빈 수신기를 반환합니다.
    pub async fn initialize(&self, url: impl Into<String>) -> mpsc::Receiver<ListenerEvent> {
        let (event_tx, event_rx) = mpsc::channel(4);
        let mut task = self.task.lock().await;
        if task.is_some() {
            tracing::warn!("listener already initialized, ignoring repeated initialize");
            return event_rx;
        }

        let shared = Arc::clone(&self.shared);
        let url = url.into();
        *task = Some(tokio::spawn(listen_loop(shared, url, event_tx)));
        event_rx
    }

    /// 구독자를 등록하고 연결 ID(해제 핸들)를 반환합니다.
    ///
    /// 구독은 리스너 연결 상태와 무관하게 유지됩니다.
    pub fn subscribe(&self, filter: SubscriberFilter, deliver: DeliveryCallback) -> String {
        self.shared.registry.subscribe(filter, deliver)
    }

    /// 구독자를 해제합니다.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.shared.registry.unsubscribe(id)
    }

    /// 현재 상태 스냅샷을 반환합니다.
    pub fn status(&self) -> ListenerStatus {
        ListenerStatus {
            state: self.shared.state(),
            reconnect_attempts: self.shared.attempts.load(Ordering::Relaxed),
            subscribers: self.shared.registry.len(),
        }
    }

    /// 리스너를 종료합니다.
    ///
    /// UNLISTEN을 실행하고 연결을 닫은 뒤 구독자를 모두 제거합니다.
    /// 여러 번 호출해도 안전합니다.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            let _ = handle.await;
        }
        self.shared.registry.clear();
        self.shared.set_state(ListenerState::ShutDown);
        tracing::info!("notification listener shut down");
    }
}

/// 리스너 메인 루프 -- 연결, 수신, 재연결을 담당합니다.
async fn listen_loop(
    shared: Arc<ListenerShared>,
    url: String,
    events: mpsc::Sender<ListenerEvent>,
) {
    let mut attempt: u32 = 0;
    let mut last_error = String::new();

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        shared.set_state(ListenerState::Connecting);

        let connected = match PgListener::connect(&url).await {
            Ok(mut listener) => match listener.listen(&shared.channel).await {
                Ok(()) => Some(listener),
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(channel = %shared.channel, error = %e, "LISTEN failed");
                    None
                }
            },
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(error = %e, "listener connection failed");
                None
            }
        };

        if let Some(mut listener) = connected {
            // (재)연결 성공: 시도 횟수 리셋, 구독자는 그대로 유지됩니다.
            attempt = 0;
            shared.attempts.store(0, Ordering::Relaxed);
            shared.set_state(ListenerState::Listening);
            tracing::info!(channel = %shared.channel, "listening for log notifications");

            loop {
                tokio::select! {
                    _ = shared.cancel.cancelled() => {
                        if let Err(e) = listener.unlisten(&shared.channel).await {
                            tracing::debug!(error = %e, "UNLISTEN failed during shutdown");
                        }
                        shared.set_state(ListenerState::ShutDown);
                        return;
                    }
                    received = listener.try_recv() => {
                        match received {
                            Ok(Some(notification)) => shared.handle_notification(&notification),
                            Ok(None) => {
                                last_error = "connection lost".to_owned();
                                tracing::warn!("listener connection lost");
                                break;
                            }
                            Err(e) => {
                                last_error = e.to_string();
                                tracing::warn!(error = %e, "listener receive failed");
                                break;
                            }
                        }
                    }
                }
            }
        }

        if shared.cancel.is_cancelled() {
            break;
        }

        shared.set_state(ListenerState::Disconnected);
        attempt += 1;
        shared.attempts.store(attempt, Ordering::Relaxed);
        metrics::counter!(logward_core::metrics::LISTENER_RECONNECTS_TOTAL).increment(1);

        if attempt > shared.max_reconnect_attempts {
            let err = StreamError::ReconnectExhausted {
                attempts: shared.max_reconnect_attempts,
                reason: last_error.clone(),
            };
            tracing::error!(error = %err, "listener giving up, operator intervention required");
            let _ = events.send(ListenerEvent::TerminalFailure(err)).await;
            return;
        }

        let delay = reconnect_backoff(attempt);
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling listener reconnect"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.cancel.cancelled() => break,
        }
    }

    shared.set_state(ListenerState::ShutDown);
}
