//! 구독자 레지스트리 -- 연결별 필터와 팬아웃 라우팅
//!
//! `connection_id -> Subscriber` 매핑을 관리합니다.
//! 레지스트리 자체는 `project_id`로만 라우팅합니다. 게시 페이로드에는
//! ID만 담기므로, 서비스/레벨 필터는 구독자 콜백이 로그를 hydrate한
//! 뒤에 [`filter_matches_logs`]로 적용합니다.
//!
//! 변경(등록/해제)은 단일 쓰기 락으로 직렬화되고, 팬아웃은 일관된
//! 스냅샷을 복사해 순회하므로 변경 중인 맵을 순회하지 않습니다.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use logward_core::error::StreamError;
use logward_core::job::BoxFuture;
use logward_core::types::{LogLevel, LogNotification, LogRecord};

/// 구독자 필터
///
/// `services`/`levels`가 비어있으면 해당 축은 필터링하지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct SubscriberFilter {
    /// 구독 프로젝트 ID
    pub project_id: String,
    /// 서비스 필터 (비어있으면 전체)
    pub services: HashSet<String>,
    /// 레벨 필터 (비어있으면 전체)
    pub levels: HashSet<LogLevel>,
}

/// 전달 콜백 capability
///
/// 콜백은 알림의 ID 목록을 직접 hydrate하여 서비스/레벨 필터를
/// 적용할 책임이 있습니다.
pub type DeliveryCallback =
    Arc<dyn Fn(LogNotification) -> BoxFuture<'static, Result<(), StreamError>> + Send + Sync>;

/// 라이브 연결당 하나의 구독자
pub struct Subscriber {
    /// 연결 ID
    pub id: String,
    /// 필터 튜플
    pub filter: SubscriberFilter,
    /// 전달 콜백
    pub deliver: DeliveryCallback,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("project_id", &self.filter.project_id)
            .finish()
    }
}

/// hydrate된 로그 목록이 구독자 필터에 매칭되는지 판정합니다.
///
/// 서비스 집합이 비어있지 않으면 참조된 로그 중 하나 이상의 서비스가
/// 집합에 속해야 하고, 레벨 집합이 비어있지 않으면 하나 이상의 레벨이
/// 집합에 속해야 합니다.
pub fn filter_matches_logs(filter: &SubscriberFilter, logs: &[LogRecord]) -> bool {
    if !filter.services.is_empty() && !logs.iter().any(|l| filter.services.contains(&l.service)) {
        return false;
    }
    if !filter.levels.is_empty() && !logs.iter().any(|l| filter.levels.contains(&l.level)) {
        return false;
    }
    true
}

/// 구독자 레지스트리
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: RwLock<HashMap<String, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 구독자를 등록하고 연결 ID를 반환합니다.
    pub fn subscribe(&self, filter: SubscriberFilter, deliver: DeliveryCallback) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let subscriber = Arc::new(Subscriber {
            id: id.clone(),
            filter,
            deliver,
        });

        let count = {
            let mut map = self.inner.write().expect("subscriber map poisoned");
            map.insert(id.clone(), subscriber);
            map.len()
        };
        metrics::gauge!(logward_core::metrics::LISTENER_SUBSCRIBERS).set(count as f64);
        tracing::debug!(subscriber_id = %id, subscribers = count, "subscriber registered");
        id
    }

    /// 구독자를 해제합니다. 존재했으면 `true`를 반환합니다.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let (removed, count) = {
            let mut map = self.inner.write().expect("subscriber map poisoned");
            let removed = map.remove(id).is_some();
            (removed, map.len())
        };
        if removed {
            metrics::gauge!(logward_core::metrics::LISTENER_SUBSCRIBERS).set(count as f64);
            tracing::debug!(subscriber_id = %id, subscribers = count, "subscriber removed");
        }
        removed
    }

    /// 프로젝트에 매칭되는 구독자의 일관된 스냅샷을 반환합니다.
    pub fn snapshot_for_project(&self, project_id: &str) -> Vec<Arc<Subscriber>> {
        let map = self.inner.read().expect("subscriber map poisoned");
        map.values()
            .filter(|s| s.filter.project_id == project_id)
            .cloned()
            .collect()
    }

    /// 현재 구독자 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.inner.read().expect("subscriber map poisoned").len()
    }

    /// 구독자가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 모든 구독자를 제거합니다 (리스너 종료 시).
    pub fn clear(&self) {
        let mut map = self.inner.write().expect("subscriber map poisoned");
        map.clear();
        metrics::gauge!(logward_core::metrics::LISTENER_SUBSCRIBERS).set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn noop_callback() -> DeliveryCallback {
        Arc::new(|_n| Box::pin(async { Ok(()) }))
    }

    fn log(service: &str, level: LogLevel) -> LogRecord {
        LogRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: "acme".to_owned(),
            project_id: Some("web".to_owned()),
            timestamp: Utc::now(),
            service: service.to_owned(),
            level,
            message: "m".to_owned(),
            attributes: serde_json::json!({}),
            span_id: None,
        }
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let registry = SubscriberRegistry::new();
        assert!(registry.is_empty());

        let id = registry.subscribe(
            SubscriberFilter {
                project_id: "p1".to_owned(),
                ..Default::default()
            },
            noop_callback(),
        );
        assert_eq!(registry.len(), 1);

        assert!(registry.unsubscribe(&id));
        assert!(!registry.unsubscribe(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_routes_by_project_only() {
        let registry = SubscriberRegistry::new();
        registry.subscribe(
            SubscriberFilter {
                project_id: "p1".to_owned(),
                ..Default::default()
            },
            noop_callback(),
        );
        registry.subscribe(
            SubscriberFilter {
                project_id: "p1".to_owned(),
                services: HashSet::from(["api".to_owned()]),
                ..Default::default()
            },
            noop_callback(),
        );
        registry.subscribe(
            SubscriberFilter {
                project_id: "p2".to_owned(),
                ..Default::default()
            },
            noop_callback(),
        );

        // 서비스 필터와 무관하게 프로젝트만으로 라우팅됩니다
        assert_eq!(registry.snapshot_for_project("p1").len(), 2);
        assert_eq!(registry.snapshot_for_project("p2").len(), 1);
        assert!(registry.snapshot_for_project("p3").is_empty());
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = SubscriberFilter {
            project_id: "p1".to_owned(),
            ..Default::default()
        };
        assert!(filter_matches_logs(
            &filter,
            &[log("api", LogLevel::Debug), log("auth", LogLevel::Info)]
        ));
    }

    #[test]
    fn service_filter_requires_any_match() {
        let filter = SubscriberFilter {
            project_id: "p1".to_owned(),
            services: HashSet::from(["auth".to_owned()]),
            ..Default::default()
        };
        assert!(filter_matches_logs(
            &filter,
            &[log("api", LogLevel::Info), log("auth", LogLevel::Info)]
        ));
        assert!(!filter_matches_logs(&filter, &[log("api", LogLevel::Info)]));
    }

    #[test]
    fn level_filter_requires_any_match() {
        let filter = SubscriberFilter {
            project_id: "p1".to_owned(),
            levels: HashSet::from([LogLevel::Error, LogLevel::Critical]),
            ..Default::default()
        };
        assert!(filter_matches_logs(
            &filter,
            &[log("api", LogLevel::Info), log("api", LogLevel::Error)]
        ));
        assert!(!filter_matches_logs(&filter, &[log("api", LogLevel::Warn)]));
    }

    #[test]
    fn combined_filters_are_conjunctive() {
        let filter = SubscriberFilter {
            project_id: "p1".to_owned(),
            services: HashSet::from(["api".to_owned()]),
            levels: HashSet::from([LogLevel::Error]),
        };
        // 서비스는 맞지만 레벨이 다름
        assert!(!filter_matches_logs(&filter, &[log("api", LogLevel::Info)]));
        // 레벨은 맞지만 서비스가 다름
        assert!(!filter_matches_logs(&filter, &[log("auth", LogLevel::Error)]));
        // 서로 다른 로그가 각각 한 축씩 만족해도 매칭됩니다 (any-match)
        assert!(filter_matches_logs(
            &filter,
            &[log("api", LogLevel::Info), log("auth", LogLevel::Error)]
        ));
    }

    #[test]
    fn clear_removes_all_subscribers() {
        let registry = SubscriberRegistry::new();
        for _ in 0..5 {
            registry.subscribe(
                SubscriberFilter {
                    project_id: "p1".to_owned(),
                    ..Default::default()
                },
                noop_callback(),
            );
        }
        assert_eq!(registry.len(), 5);
        registry.clear();
        assert!(registry.is_empty());
    }
}
