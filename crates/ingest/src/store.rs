//! 로그 레코드 저장소 -- 배치 삽입과 ID 조회
//!
//! `log_records` 테이블에 대한 접근을 담당합니다.
//! 배치 삽입은 단일 트랜잭션으로 수행되어 전체가 성공하거나
//! 전체가 실패합니다.

use sqlx::Row;
use sqlx::postgres::PgPool;

use logward_core::error::StorageError;
use logward_core::types::{LogLevel, LogRecord};

/// 로그 레코드 테이블 스키마를 생성합니다 (존재하면 무시).
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    const DDL: &[&str] = &[
        r"CREATE TABLE IF NOT EXISTS log_records (
            id          TEXT PRIMARY KEY,
            tenant_id   TEXT NOT NULL,
            project_id  TEXT,
            timestamp   TIMESTAMPTZ NOT NULL,
            service     TEXT NOT NULL,
            level       TEXT NOT NULL,
            message     TEXT NOT NULL,
            attributes  JSONB NOT NULL DEFAULT '{}'::jsonb,
            span_id     TEXT,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        r"CREATE INDEX IF NOT EXISTS log_records_tenant_project_ts_idx
            ON log_records (tenant_id, project_id, timestamp)",
    ];

    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// 로그 레코드 저장소
pub struct LogStore {
    pool: PgPool,
}

impl LogStore {
    /// 새 저장소를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 배치를 단일 트랜잭션으로 저장합니다.
    ///
    /// 입력 순서대로 삽입되므로 동일 timestamp의 레코드도
    /// 삽입 순서가 보존됩니다.
    pub async fn insert_batch(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r"INSERT INTO log_records
                    (id, tenant_id, project_id, timestamp, service, level, message, attributes, span_id)
                  VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&record.id)
            .bind(&record.tenant_id)
            .bind(record.project_id.as_deref())
            .bind(record.timestamp)
            .bind(&record.service)
            .bind(record.level.as_str())
            .bind(&record.message)
            .bind(&record.attributes)
            .bind(record.span_id.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// ID 목록으로 로그를 조회합니다.
    ///
    /// 결과는 요청한 ID 순서대로 반환됩니다. 존재하지 않는 ID는
    /// 조용히 건너뜁니다 (스캔 잡 재실행 시 이미 보존 기간이 지난
    /// 로그가 있을 수 있습니다).
    pub async fn fetch_by_ids(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<LogRecord>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r"SELECT id, tenant_id, project_id, timestamp, service, level, message, attributes, span_id
              FROM log_records
              WHERE tenant_id = $1 AND id = ANY($2)",
        )
        .bind(tenant_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_id = std::collections::HashMap::with_capacity(rows.len());
        for row in rows {
            let record = Self::row_to_record(&row)?;
            by_id.insert(record.id.clone(), record);
        }

        // 요청 순서 복원
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<LogRecord, StorageError> {
        let level_str: String = row.try_get("level").map_err(StorageError::from)?;
        let level = LogLevel::from_str_loose(&level_str)
            .ok_or_else(|| StorageError::Query(format!("unknown log level '{level_str}'")))?;

        Ok(LogRecord {
            id: row.try_get("id").map_err(StorageError::from)?,
            tenant_id: row.try_get("tenant_id").map_err(StorageError::from)?,
            project_id: row.try_get("project_id").map_err(StorageError::from)?,
            timestamp: row.try_get("timestamp").map_err(StorageError::from)?,
            service: row.try_get("service").map_err(StorageError::from)?,
            level,
            message: row.try_get("message").map_err(StorageError::from)?,
            attributes: row.try_get("attributes").map_err(StorageError::from)?,
            span_id: row.try_get("span_id").map_err(StorageError::from)?,
        })
    }
}
