//! 규칙 평가기 -- 활성 팩의 규칙을 로그 배치에 적용합니다.
//!
//! 탐지 이벤트를 단독으로 생성하는 컴포넌트입니다.
//!
//! # 알고리즘
//! 1. 테넌트의 활성화를 로드합니다 (테넌트별 캐시, 활성화 변경 시 무효화)
//! 2. 활성 팩의 각 규칙에 대해 유효 심각도를 결정합니다
//!    (`override.level ?? rule.level`)
//! 3. 로그 소스 셀렉터를 적용합니다 (제공된 필드만 동일성 비교)
//! 4. 탐지 표현식을 평가합니다
//! 5. 참이면 유효 심각도와 메시지 발췌(200자)로 탐지 이벤트를 냅니다
//!
//! 평가 순서: 로그는 배치 순서, 규칙은 팩 순서와 팩 내 선언 순서.
//! 이벤트는 그 순서 그대로 상관기에 전달됩니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use logward_core::error::DetectError;
use logward_core::types::{
    DetectionEvent, LogRecord, MESSAGE_EXCERPT_CHARS, Severity, message_excerpt,
};

use crate::activation::ActivationSource;
use crate::catalog::{CompiledRule, PackCatalog};
use crate::selection::{field_value, selection_matches};

/// 활성화가 적용된 평가 대상 규칙
#[derive(Clone)]
pub struct ActiveRule {
    /// 규칙이 속한 팩 ID
    pub pack_id: String,
    /// 컴파일된 규칙
    pub rule: Arc<CompiledRule>,
    /// 오버라이드 적용 후 유효 심각도
    pub effective_level: Severity,
}

/// 규칙 평가기
pub struct RuleEvaluator {
    catalog: Arc<PackCatalog>,
    activations: Arc<dyn ActivationSource>,
    /// 테넌트별 활성 규칙 캐시
    cache: RwLock<HashMap<String, Arc<Vec<ActiveRule>>>>,
    /// (tenant, rule/atom)당 1회 경고를 보장하는 기록
    warned: std::sync::Mutex<HashSet<(String, String)>>,
}

impl RuleEvaluator {
    /// 새 평가기를 생성합니다.
    pub fn new(catalog: Arc<PackCatalog>, activations: Arc<dyn ActivationSource>) -> Self {
        Self {
            catalog,
            activations,
            cache: RwLock::new(HashMap::new()),
            warned: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// 테넌트의 활성 규칙 캐시를 무효화합니다.
    ///
    /// 팩 활성화 변경(enable/disable/updateThresholds) 시 호출됩니다.
    pub async fn invalidate(&self, tenant_id: &str) {
        self.cache.write().await.remove(tenant_id);
        tracing::debug!(tenant_id, "evaluator cache invalidated");
    }

    /// 테넌트의 활성 규칙 목록을 반환합니다 (캐시 우선).
    ///
    /// 팩 출하 순서와 팩 내 선언 순서가 보존됩니다.
    /// `deprecated`/`unsupported` 규칙도 목록에 포함되지만 평가 시
    /// 건너뜁니다.
    pub async fn active_rules(&self, tenant_id: &str) -> Result<Arc<Vec<ActiveRule>>, DetectError> {
        if let Some(cached) = self.cache.read().await.get(tenant_id) {
            return Ok(Arc::clone(cached));
        }

        let activations = self.activations.activations_for_tenant(tenant_id).await?;
        let by_pack: HashMap<&str, _> = activations
            .iter()
            .map(|a| (a.pack_id.as_str(), a))
            .collect();

        let mut rules = Vec::new();
        for pack in self.catalog.list_packs() {
            let Some(activation) = by_pack.get(pack.id.as_str()) else {
                continue;
            };
            if !activation.enabled {
                continue;
            }

            for rule in &pack.rules {
                let effective_level = activation
                    .thresholds
                    .get(&rule.rule.id)
                    .and_then(|o| o.level)
                    .unwrap_or(rule.rule.level);

                rules.push(ActiveRule {
                    pack_id: pack.id.clone(),
                    rule: Arc::clone(rule),
                    effective_level,
                });
            }
        }

        let rules = Arc::new(rules);
        self.cache
            .write()
            .await
            .insert(tenant_id.to_owned(), Arc::clone(&rules));
        Ok(rules)
    }

    /// 로그 배치에 대해 모든 활성 규칙을 평가합니다.
    ///
    /// 규칙 에러(알 수 없는 condition atom)는 해당 규칙만 건너뛰고
    /// 테넌트/규칙당 1회 경고를 남깁니다. 나머지 규칙 평가는
    /// 계속됩니다.
    pub async fn evaluate(
        &self,
        tenant_id: &str,
        logs: &[LogRecord],
    ) -> Result<Vec<DetectionEvent>, DetectError> {
        let rules = self.active_rules(tenant_id).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        for log in logs {
            for active in rules.iter() {
                if !active.rule.rule.status.is_evaluated() {
                    continue;
                }

                metrics::counter!(logward_core::metrics::DETECT_RULES_EVALUATED_TOTAL)
                    .increment(1);

                if !logsource_matches(&active.rule, log) {
                    continue;
                }

                let lookup = |name: &str| -> Option<bool> {
                    active
                        .rule
                        .selections
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, predicates)| selection_matches(predicates, log))
                };

                let mut unknown = Vec::new();
                let matched = active.rule.condition.evaluate(
                    &active.rule.selection_names,
                    &lookup,
                    &mut unknown,
                );

                if !unknown.is_empty() {
                    self.warn_once(tenant_id, &active.rule.rule.id, &unknown);
                }

                if matched {
                    let event = DetectionEvent {
                        id: uuid::Uuid::new_v4().to_string(),
                        tenant_id: tenant_id.to_owned(),
                        project_id: log.project_id.clone(),
                        rule_id: active.rule.rule.id.clone(),
                        pack_id: active.pack_id.clone(),
                        log_id: log.id.clone(),
                        service: log.service.clone(),
                        severity: active.effective_level,
                        timestamp: Utc::now(),
                        message_excerpt: message_excerpt(&log.message, MESSAGE_EXCERPT_CHARS),
                    };

                    metrics::counter!(
                        logward_core::metrics::DETECT_EVENTS_TOTAL,
                        logward_core::metrics::LABEL_SEVERITY => event.severity.as_str()
                    )
                    .increment(1);

                    tracing::debug!(
                        tenant_id,
                        rule_id = %event.rule_id,
                        log_id = %event.log_id,
                        severity = %event.severity,
                        "detection event emitted"
                    );
                    events.push(event);
                }
            }
        }

        Ok(events)
    }

    /// 알 수 없는 condition atom을 (tenant, rule)당 1회만 경고합니다.
    fn warn_once(&self, tenant_id: &str, rule_id: &str, unknown: &[String]) {
        let key = (tenant_id.to_owned(), rule_id.to_owned());
        let mut warned = self.warned.lock().expect("warned set poisoned");
        if warned.insert(key) {
            tracing::warn!(
                tenant_id,
                rule_id,
                atoms = ?unknown,
                "condition references unknown selections, treating as false"
            );
        }
    }
}

/// 로그 소스 셀렉터를 적용합니다.
///
/// 제공된 필드(product/service/category)는 로그의 대응 속성과
/// 동일해야 하고, 생략된 필드는 와일드카드입니다.
fn logsource_matches(rule: &CompiledRule, log: &LogRecord) -> bool {
    let logsource = &rule.rule.logsource;

    if let Some(ref service) = logsource.service
        && log.service != *service
    {
        return false;
    }
    if let Some(ref product) = logsource.product {
        match field_value(log, "product") {
            Some(serde_json::Value::String(actual)) if actual == *product => {}
            _ => return false,
        }
    }
    if let Some(ref category) = logsource.category {
        match field_value(log, "category") {
            Some(serde_json::Value::String(actual)) if actual == *category => {}
            _ => return false,
        }
    }
    true
}
