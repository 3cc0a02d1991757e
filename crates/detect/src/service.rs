//! 팩 서비스 -- 상위 레이어(HTTP 등)에 노출되는 팩 조작 인터페이스
//!
//! 카탈로그 조회, 팩 활성화/비활성화, 임계값 갱신을 하나로 묶고,
//! 활성화가 변경될 때마다 평가기의 테넌트 캐시를 무효화합니다.

use std::sync::Arc;

use serde::Serialize;

use logward_core::error::DetectError;

use crate::activation::{ActivationStore, EnablePackOptions, PackActivation, ThresholdMap};
use crate::catalog::{PackCatalog, PackCategory};
use crate::evaluator::RuleEvaluator;

/// 테넌트 관점의 팩 요약 (목록 응답)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackStatusView {
    /// 팩 ID
    pub id: String,
    /// 표시 이름
    pub name: String,
    /// 카테고리
    pub category: PackCategory,
    /// 아이콘
    pub icon: String,
    /// 작성자
    pub author: String,
    /// 버전
    pub version: String,
    /// 규칙 수
    pub rule_count: usize,
    /// 테넌트 활성화 여부
    pub enabled: bool,
    /// 활성화 상세 (활성화된 경우)
    pub activation: Option<PackActivation>,
}

/// 팩 서비스
pub struct PackService {
    catalog: Arc<PackCatalog>,
    store: Arc<ActivationStore>,
    evaluator: Arc<RuleEvaluator>,
}

impl PackService {
    /// 새 팩 서비스를 생성합니다.
    pub fn new(
        catalog: Arc<PackCatalog>,
        store: Arc<ActivationStore>,
        evaluator: Arc<RuleEvaluator>,
    ) -> Self {
        Self {
            catalog,
            store,
            evaluator,
        }
    }

    /// 테넌트 관점의 팩 목록을 반환합니다.
    pub async fn list_packs(&self, tenant_id: &str) -> Result<Vec<PackStatusView>, DetectError> {
        let mut views = Vec::new();
        for pack in self.catalog.list_packs() {
            let activation = self.store.get(tenant_id, &pack.id).await?;
            views.push(PackStatusView {
                id: pack.id.clone(),
                name: pack.name.clone(),
                category: pack.category,
                icon: pack.icon.clone(),
                author: pack.author.clone(),
                version: pack.version.clone(),
                rule_count: pack.rules.len(),
                enabled: activation.as_ref().is_some_and(|a| a.enabled),
                activation,
            });
        }
        Ok(views)
    }

    /// 팩을 활성화합니다.
    pub async fn enable_pack(
        &self,
        tenant_id: &str,
        pack_id: &str,
        options: EnablePackOptions,
    ) -> Result<(), DetectError> {
        self.validate_thresholds(pack_id, &options.thresholds)?;
        self.store.enable(tenant_id, pack_id, options).await?;
        self.evaluator.invalidate(tenant_id).await;
        Ok(())
    }

    /// 팩을 비활성화합니다.
    pub async fn disable_pack(&self, tenant_id: &str, pack_id: &str) -> Result<(), DetectError> {
        if self.catalog.pack_by_id(pack_id).is_none() {
            return Err(DetectError::UnknownPack(pack_id.to_owned()));
        }
        self.store.disable(tenant_id, pack_id).await?;
        self.evaluator.invalidate(tenant_id).await;
        Ok(())
    }

    /// 활성화된 팩의 임계값 오버라이드를 교체합니다.
    pub async fn update_thresholds(
        &self,
        tenant_id: &str,
        pack_id: &str,
        thresholds: ThresholdMap,
    ) -> Result<(), DetectError> {
        self.validate_thresholds(pack_id, &thresholds)?;
        self.store
            .update_thresholds(tenant_id, pack_id, thresholds)
            .await?;
        self.evaluator.invalidate(tenant_id).await;
        Ok(())
    }

    /// 임계값 오버라이드의 규칙 ID가 팩에 실제로 존재하는지 검증합니다.
    fn validate_thresholds(
        &self,
        pack_id: &str,
        thresholds: &ThresholdMap,
    ) -> Result<(), DetectError> {
        let pack = self
            .catalog
            .pack_by_id(pack_id)
            .ok_or_else(|| DetectError::UnknownPack(pack_id.to_owned()))?;

        for rule_id in thresholds.keys() {
            if pack.rule_by_id(rule_id).is_none() {
                return Err(DetectError::InvalidThreshold {
                    rule_id: rule_id.clone(),
                    reason: format!("rule does not exist in pack '{pack_id}'"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::RuleThresholdOverride;
    use logward_core::types::Severity;
    use sqlx::postgres::PgPoolOptions;

    fn service() -> PackService {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://localhost/logward_test")
            .unwrap();
        let catalog = Arc::new(PackCatalog::builtin().unwrap());
        let store = Arc::new(ActivationStore::new(pool));
        let evaluator = Arc::new(RuleEvaluator::new(
            Arc::clone(&catalog),
            Arc::clone(&store) as Arc<dyn crate::activation::ActivationSource>,
        ));
        PackService::new(catalog, store, evaluator)
    }

    #[tokio::test]
    async fn enable_unknown_pack_is_rejected_before_storage() {
        let service = service();
        let result = service
            .enable_pack("acme", "no-such-pack", EnablePackOptions::default())
            .await;
        assert!(matches!(result, Err(DetectError::UnknownPack(_))));
    }

    #[tokio::test]
    async fn threshold_for_unknown_rule_is_rejected() {
        let service = service();
        let mut thresholds = ThresholdMap::new();
        thresholds.insert(
            "no-such-rule".to_owned(),
            RuleThresholdOverride {
                level: Some(Severity::High),
                ..Default::default()
            },
        );

        let result = service
            .enable_pack(
                "acme",
                "auth-security",
                EnablePackOptions {
                    thresholds,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(DetectError::InvalidThreshold { .. })));
    }

    #[tokio::test]
    async fn known_rule_threshold_passes_validation() {
        let service = service();
        let mut thresholds = ThresholdMap::new();
        thresholds.insert(
            "failed-login-attempts".to_owned(),
            RuleThresholdOverride {
                level: Some(Severity::High),
                ..Default::default()
            },
        );
        // 검증은 통과하고 그 다음 저장소 호출에서 (테스트 DB 부재로) 실패합니다
        let result = service
            .enable_pack(
                "acme",
                "auth-security",
                EnablePackOptions {
                    thresholds,
                    ..Default::default()
                },
            )
            .await;
        assert!(!matches!(
            result,
            Err(DetectError::InvalidThreshold { .. }) | Err(DetectError::UnknownPack(_))
        ));
    }
}
