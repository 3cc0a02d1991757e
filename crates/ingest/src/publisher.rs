//! 알림 게시기 -- 커밋 후 채널 메시지를 청크 단위로 게시합니다.
//!
//! 기본 스토어의 NOTIFY 채널에 `{projectId, logIds, timestamp}` 페이로드를
//! 게시합니다. 스토어의 페이로드 상한(약 8KB)을 고려하여 7900바이트
//! 예산과 ID당 약 40바이트 추정으로 배치를 연속 청크로 분할합니다.
//!
//! 모든 실패는 잡아서 로그만 남깁니다. 호출자에게는 절대 에러를
//! 전파하지 않습니다 (스트리밍은 best-effort).

use chrono::Utc;
use sqlx::postgres::PgPool;

use logward_core::types::LogNotification;

/// 페이로드 예산 (스토어 상한 약 8KB에서 안전 여유를 둔 값)
pub const MAX_PAYLOAD_BYTES: usize = 7900;

/// ID당 추정 크기 (바이트)
pub const ID_SIZE_ESTIMATE: usize = 40;

/// 청크당 최대 로그 ID 수
pub const MAX_LOG_IDS_PER_CHUNK: usize = MAX_PAYLOAD_BYTES / ID_SIZE_ESTIMATE;

/// ID 목록을 게시 청크로 분할합니다.
///
/// 입력 순서를 보존하는 연속 청크를 반환합니다.
/// 빈 입력은 빈 청크 목록을 반환합니다.
pub fn chunk_ids(ids: &[String]) -> Vec<&[String]> {
    ids.chunks(MAX_LOG_IDS_PER_CHUNK).collect()
}

/// 알림 게시기
pub struct NotifyPublisher {
    pool: PgPool,
    channel: String,
}

impl NotifyPublisher {
    /// 새 게시기를 생성합니다.
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// 게시 채널 이름을 반환합니다.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 새 로그 ID 목록을 채널에 게시합니다.
    ///
    /// 배치가 크면 여러 메시지로 분할되며, 청크는 입력 순서대로
    /// 게시됩니다. 게시된 청크 수를 반환합니다 (실패한 청크 제외).
    pub async fn publish(&self, project_id: &str, log_ids: &[String]) -> usize {
        if log_ids.is_empty() {
            return 0;
        }

        let mut published = 0usize;
        for chunk in chunk_ids(log_ids) {
            let notification = LogNotification {
                project_id: project_id.to_owned(),
                log_ids: chunk.to_vec(),
                timestamp: Utc::now(),
            };

            let payload = match serde_json::to_string(&notification) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(project_id, error = %e, "failed to serialize notification");
                    metrics::counter!(logward_core::metrics::PUBLISH_FAILURES_TOTAL).increment(1);
                    continue;
                }
            };

            match sqlx::query("SELECT pg_notify($1, $2)")
                .bind(&self.channel)
                .bind(&payload)
                .execute(&self.pool)
                .await
            {
                Ok(_) => {
                    published += 1;
                    metrics::counter!(logward_core::metrics::PUBLISH_NOTIFICATIONS_TOTAL)
                        .increment(1);
                    tracing::debug!(
                        project_id,
                        ids = chunk.len(),
                        channel = %self.channel,
                        "published log notification chunk"
                    );
                }
                Err(e) => {
                    metrics::counter!(logward_core::metrics::PUBLISH_FAILURES_TOTAL).increment(1);
                    tracing::warn!(
                        project_id,
                        channel = %self.channel,
                        error = %e,
                        "failed to publish log notification"
                    );
                }
            }
        }

        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:036}")).collect()
    }

    #[test]
    fn chunk_budget_constants() {
        assert_eq!(MAX_PAYLOAD_BYTES, 7900);
        assert_eq!(ID_SIZE_ESTIMATE, 40);
        assert_eq!(MAX_LOG_IDS_PER_CHUNK, 197);
    }

    #[test]
    fn small_batch_is_one_chunk() {
        let ids = ids(42);
        let chunks = chunk_ids(&ids);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 42);
    }

    #[test]
    fn chunk_count_matches_ceiling_division() {
        for n in [1, 196, 197, 198, 250, 500, 1000] {
            let ids = ids(n);
            let chunks = chunk_ids(&ids);
            let expected = n.div_ceil(MAX_LOG_IDS_PER_CHUNK);
            assert_eq!(chunks.len(), expected, "n={n}");
        }
    }

    #[test]
    fn five_hundred_ids_make_three_chunks() {
        // ⌈500 * 40 / 7900⌉ = 3
        let ids = ids(500);
        assert_eq!(chunk_ids(&ids).len(), 3);
    }

    #[test]
    fn chunk_concatenation_preserves_order() {
        let ids = ids(500);
        let chunks = chunk_ids(&ids);
        let rejoined: Vec<String> = chunks.iter().flat_map(|c| c.iter().cloned()).collect();
        assert_eq!(rejoined, ids);
    }

    #[test]
    fn full_chunk_stays_under_payload_budget() {
        // UUID v4 문자열(36자) 기준으로 실제 직렬화 크기를 확인합니다.
        let ids: Vec<String> = (0..MAX_LOG_IDS_PER_CHUNK)
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();
        let notification = LogNotification {
            project_id: "project-with-a-long-name".to_owned(),
            log_ids: ids,
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_string(&notification).unwrap();
        assert!(
            payload.len() <= MAX_PAYLOAD_BYTES,
            "payload {} exceeds budget",
            payload.len()
        );
    }

    #[test]
    fn empty_batch_has_no_chunks() {
        let chunks = chunk_ids(&[]);
        assert!(chunks.is_empty());
    }
}
