//! 팩 활성화 -- 테넌트별 팩 상태와 규칙별 임계값 오버라이드
//!
//! `pack_activations` 테이블은 (tenant, pack)당 정확히 한 행을
//! 가집니다. 활성화는 테넌트 관리 API(코어 외부)가 변경하고,
//! 평가기는 읽기만 합니다. 오버라이드는 심각도를 재지정하거나
//! 다운스트림 알림(이메일/웹훅)만 끌 수 있으며, 탐지 이벤트 생성
//! 자체는 막지 않습니다.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgPool;

use logward_core::error::{DetectError, StorageError};
use logward_core::job::BoxFuture;
use logward_core::types::Severity;

/// 규칙별 임계값 오버라이드
///
/// 와이어 형식: `{"level": ..., "emailEnabled": ..., "webhookEnabled": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleThresholdOverride {
    /// 유효 심각도 재지정
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Severity>,
    /// 이메일 알림 게이트 (다운스트림 전용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_enabled: Option<bool>,
    /// 웹훅 알림 게이트 (다운스트림 전용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_enabled: Option<bool>,
}

/// 임계값 오버라이드 맵: rule id -> 오버라이드
pub type ThresholdMap = HashMap<String, RuleThresholdOverride>;

/// 팩 활성화 상태 -- (tenant, pack)당 한 행
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackActivation {
    /// 테넌트 ID
    pub tenant_id: String,
    /// 팩 ID
    pub pack_id: String,
    /// 활성화 여부 (false면 팩의 모든 규칙 평가가 억제됩니다)
    pub enabled: bool,
    /// 규칙별 임계값 오버라이드
    pub thresholds: ThresholdMap,
    /// 알림 수신 이메일 목록 (다운스트림 전용)
    pub email_recipients: Vec<String>,
    /// 알림 웹훅 URL (다운스트림 전용)
    pub webhook_url: Option<String>,
    /// 최초 활성화 시각
    pub activated_at: DateTime<Utc>,
    /// 마지막 변경 시각
    pub updated_at: DateTime<Utc>,
}

/// 팩 활성화 옵션 (enable 시)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnablePackOptions {
    /// 규칙별 임계값 오버라이드
    #[serde(default)]
    pub thresholds: ThresholdMap,
    /// 알림 수신 이메일
    #[serde(default)]
    pub email_recipients: Vec<String>,
    /// 알림 웹훅 URL
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// 테넌트의 활성화 목록을 제공하는 capability
///
/// 평가기는 이 trait을 통해 읽으므로 저장소 구현을 테스트에서
/// 메모리 구현으로 대체할 수 있습니다.
pub trait ActivationSource: Send + Sync {
    /// 테넌트의 모든 활성화를 반환합니다.
    fn activations_for_tenant(
        &self,
        tenant_id: &str,
    ) -> BoxFuture<'_, Result<Vec<PackActivation>, DetectError>>;
}

/// 활성화 테이블 스키마를 생성합니다 (존재하면 무시).
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS pack_activations (
            tenant_id        TEXT NOT NULL,
            pack_id          TEXT NOT NULL,
            enabled          BOOLEAN NOT NULL DEFAULT TRUE,
            thresholds       JSONB NOT NULL DEFAULT '{}'::jsonb,
            email_recipients JSONB NOT NULL DEFAULT '[]'::jsonb,
            webhook_url      TEXT,
            activated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (tenant_id, pack_id)
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// 팩 활성화 저장소
pub struct ActivationStore {
    pool: PgPool,
}

impl ActivationStore {
    /// 새 저장소를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 팩을 활성화합니다 (이미 있으면 갱신).
    pub async fn enable(
        &self,
        tenant_id: &str,
        pack_id: &str,
        options: EnablePackOptions,
    ) -> Result<(), DetectError> {
        let thresholds = serde_json::to_value(&options.thresholds)
            .map_err(|e| StorageError::Query(e.to_string()))?;
        let recipients = serde_json::to_value(&options.email_recipients)
            .map_err(|e| StorageError::Query(e.to_string()))?;

        sqlx::query(
            r"INSERT INTO pack_activations
                (tenant_id, pack_id, enabled, thresholds, email_recipients, webhook_url)
              VALUES ($1, $2, TRUE, $3, $4, $5)
              ON CONFLICT (tenant_id, pack_id) DO UPDATE
              SET enabled = TRUE,
                  thresholds = EXCLUDED.thresholds,
                  email_recipients = EXCLUDED.email_recipients,
                  webhook_url = EXCLUDED.webhook_url,
                  updated_at = now()",
        )
        .bind(tenant_id)
        .bind(pack_id)
        .bind(&thresholds)
        .bind(&recipients)
        .bind(options.webhook_url.as_deref())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::info!(tenant_id, pack_id, "pack enabled");
        Ok(())
    }

    /// 팩 활성화를 제거합니다.
    pub async fn disable(&self, tenant_id: &str, pack_id: &str) -> Result<(), DetectError> {
        sqlx::query("DELETE FROM pack_activations WHERE tenant_id = $1 AND pack_id = $2")
            .bind(tenant_id)
            .bind(pack_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        tracing::info!(tenant_id, pack_id, "pack disabled");
        Ok(())
    }

    /// 활성화된 팩의 임계값 오버라이드를 교체합니다.
    pub async fn update_thresholds(
        &self,
        tenant_id: &str,
        pack_id: &str,
        thresholds: ThresholdMap,
    ) -> Result<(), DetectError> {
        let thresholds = serde_json::to_value(&thresholds)
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let result = sqlx::query(
            r"UPDATE pack_activations
              SET thresholds = $3, updated_at = now()
              WHERE tenant_id = $1 AND pack_id = $2",
        )
        .bind(tenant_id)
        .bind(pack_id)
        .bind(&thresholds)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Err(DetectError::UnknownPack(format!(
                "{pack_id} is not activated for tenant {tenant_id}"
            )));
        }
        Ok(())
    }

    /// 단일 활성화를 조회합니다.
    pub async fn get(
        &self,
        tenant_id: &str,
        pack_id: &str,
    ) -> Result<Option<PackActivation>, DetectError> {
        let row = sqlx::query(
            r"SELECT tenant_id, pack_id, enabled, thresholds, email_recipients,
                     webhook_url, activated_at, updated_at
              FROM pack_activations
              WHERE tenant_id = $1 AND pack_id = $2",
        )
        .bind(tenant_id)
        .bind(pack_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;

        row.map(|row| Self::row_to_activation(&row)).transpose()
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<PackActivation>, DetectError> {
        let rows = sqlx::query(
            r"SELECT tenant_id, pack_id, enabled, thresholds, email_recipients,
                     webhook_url, activated_at, updated_at
              FROM pack_activations
              WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        rows.iter().map(Self::row_to_activation).collect()
    }

    fn row_to_activation(row: &sqlx::postgres::PgRow) -> Result<PackActivation, DetectError> {
        let thresholds: serde_json::Value =
            row.try_get("thresholds").map_err(StorageError::from)?;
        let thresholds: ThresholdMap = serde_json::from_value(thresholds)
            .map_err(|e| StorageError::Query(format!("malformed thresholds: {e}")))?;

        let recipients: serde_json::Value = row
            .try_get("email_recipients")
            .map_err(StorageError::from)?;
        let email_recipients: Vec<String> = serde_json::from_value(recipients)
            .map_err(|e| StorageError::Query(format!("malformed email_recipients: {e}")))?;

        Ok(PackActivation {
            tenant_id: row.try_get("tenant_id").map_err(StorageError::from)?,
            pack_id: row.try_get("pack_id").map_err(StorageError::from)?,
            enabled: row.try_get("enabled").map_err(StorageError::from)?,
            thresholds,
            email_recipients,
            webhook_url: row.try_get("webhook_url").map_err(StorageError::from)?,
            activated_at: row.try_get("activated_at").map_err(StorageError::from)?,
            updated_at: row.try_get("updated_at").map_err(StorageError::from)?,
        })
    }
}

impl ActivationSource for ActivationStore {
    fn activations_for_tenant(
        &self,
        tenant_id: &str,
    ) -> BoxFuture<'_, Result<Vec<PackActivation>, DetectError>> {
        let tenant_id = tenant_id.to_owned();
        Box::pin(async move { self.list_for_tenant(&tenant_id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_override_wire_format() {
        let json = r#"{"level": "critical", "emailEnabled": false, "webhookEnabled": true}"#;
        let parsed: RuleThresholdOverride = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.level, Some(Severity::Critical));
        assert_eq!(parsed.email_enabled, Some(false));
        assert_eq!(parsed.webhook_enabled, Some(true));
    }

    #[test]
    fn threshold_override_fields_are_optional() {
        let parsed: RuleThresholdOverride = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, RuleThresholdOverride::default());

        let parsed: RuleThresholdOverride =
            serde_json::from_str(r#"{"level": "high"}"#).unwrap();
        assert_eq!(parsed.level, Some(Severity::High));
        assert!(parsed.email_enabled.is_none());
    }

    #[test]
    fn threshold_map_parses_rule_keys() {
        let json = r#"{"failed-login-attempts": {"level": "high"}}"#;
        let map: ThresholdMap = serde_json::from_str(json).unwrap();
        assert_eq!(
            map.get("failed-login-attempts").unwrap().level,
            Some(Severity::High)
        );
    }

    #[test]
    fn enable_options_default_is_empty() {
        let options: EnablePackOptions = serde_json::from_str("{}").unwrap();
        assert!(options.thresholds.is_empty());
        assert!(options.email_recipients.is_empty());
        assert!(options.webhook_url.is_none());
    }
}
