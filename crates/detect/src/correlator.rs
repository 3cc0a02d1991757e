//! 인시던트 상관기 -- 탐지 이벤트를 인시던트로 묶습니다.
//!
//! 상관 키는 `(tenant, project, rule-family)`이며, rule-family는
//! 규칙 ID에서 인스턴스 접미사(`-<숫자>`)를 제거한 것입니다.
//!
//! # 정책
//! 같은 키의 비종결 인시던트가 상관 윈도우(기본 15분) 안에 갱신된 적이
//! 있으면 이벤트를 추가합니다 (카운트 증가, 서비스 합집합, 심각도
//! max로 상향). 없으면 status=open, 심각도=이벤트 심각도,
//! detection_count=1인 새 인시던트를 엽니다. 종결 상태(resolved,
//! false_positive)의 인시던트는 재개되지 않고 새 인시던트가 열립니다.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgPool;

use logward_core::error::{DetectError, StorageError};
use logward_core::types::{DetectionEvent, Incident, IncidentStatus, Severity};

/// 규칙 ID에서 상관 패밀리를 추출합니다.
///
/// 끝의 `-<숫자>` 세그먼트는 인스턴스 접미사로 보고 제거합니다.
/// (`failed-login-attempts-2` -> `failed-login-attempts`)
pub fn rule_family(rule_id: &str) -> &str {
    if let Some((prefix, suffix)) = rule_id.rsplit_once('-')
        && !prefix.is_empty()
        && !suffix.is_empty()
        && suffix.chars().all(|c| c.is_ascii_digit())
    {
        return prefix;
    }
    rule_id
}

/// 상관 결정 -- 기존 인시던트에 추가하거나 새로 엽니다.
#[derive(Debug, Clone)]
pub enum CorrelationDecision {
    /// 새 인시던트를 엽니다.
    Open(Incident),
    /// 기존 인시던트에 이벤트를 추가합니다.
    Append {
        /// 대상 인시던트 ID
        incident_id: String,
        /// 상향된 심각도 (기존과 이벤트의 max)
        severity: Severity,
        /// 증가된 탐지 수
        detection_count: u64,
        /// 합집합된 영향 서비스
        affected_services: BTreeSet<String>,
    },
}

/// 상관 정책을 적용합니다 (순수 함수).
///
/// `existing`은 같은 상관 키로 조회된 가장 최근 인시던트입니다.
pub fn correlate(
    existing: Option<&Incident>,
    event: &DetectionEvent,
    now: DateTime<Utc>,
    window: Duration,
) -> CorrelationDecision {
    if let Some(incident) = existing
        && !incident.status.is_terminal()
        && now.signed_duration_since(incident.updated_at).num_seconds() >= 0
        && (now.signed_duration_since(incident.updated_at).num_seconds() as u64)
            <= window.as_secs()
    {
        let mut affected_services = incident.affected_services.clone();
        affected_services.insert(event.service.clone());
        return CorrelationDecision::Append {
            incident_id: incident.id.clone(),
            severity: incident.severity.max(event.severity),
            detection_count: incident.detection_count + 1,
            affected_services,
        };
    }

    CorrelationDecision::Open(Incident {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: event.tenant_id.clone(),
        project_id: event.project_id.clone(),
        rule_family: rule_family(&event.rule_id).to_owned(),
        status: IncidentStatus::Open,
        severity: event.severity,
        detection_count: 1,
        affected_services: BTreeSet::from([event.service.clone()]),
        created_at: now,
        updated_at: now,
        resolved_at: None,
    })
}

/// 인시던트/탐지 이벤트 테이블 스키마를 생성합니다 (존재하면 무시).
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    const DDL: &[&str] = &[
        r"CREATE TABLE IF NOT EXISTS incidents (
            id                TEXT PRIMARY KEY,
            tenant_id         TEXT NOT NULL,
            project_id        TEXT,
            rule_family       TEXT NOT NULL,
            status            TEXT NOT NULL DEFAULT 'open',
            severity          TEXT NOT NULL,
            detection_count   BIGINT NOT NULL DEFAULT 1,
            affected_services JSONB NOT NULL DEFAULT '[]'::jsonb,
            created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
            resolved_at       TIMESTAMPTZ
        )",
        r"CREATE INDEX IF NOT EXISTS incidents_correlation_idx
            ON incidents (tenant_id, project_id, rule_family, updated_at DESC)",
        r"CREATE TABLE IF NOT EXISTS detection_events (
            id              TEXT PRIMARY KEY,
            tenant_id       TEXT NOT NULL,
            project_id      TEXT,
            rule_id         TEXT NOT NULL,
            pack_id         TEXT NOT NULL,
            log_id          TEXT NOT NULL,
            service         TEXT NOT NULL,
            severity        TEXT NOT NULL,
            timestamp       TIMESTAMPTZ NOT NULL,
            message_excerpt TEXT NOT NULL,
            incident_id     TEXT
        )",
        r"CREATE INDEX IF NOT EXISTS detection_events_tenant_ts_idx
            ON detection_events (tenant_id, timestamp)",
        r"CREATE INDEX IF NOT EXISTS detection_events_incident_idx
            ON detection_events (incident_id)",
    ];

    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// 인시던트/탐지 이벤트 저장소
pub struct IncidentStore {
    pool: PgPool,
}

impl IncidentStore {
    /// 새 저장소를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 상관 키로 가장 최근 인시던트를 조회합니다.
    ///
    /// 종결 여부와 무관하게 최신 한 건을 반환합니다. 종결 인시던트의
    /// 재개 여부 판단은 [`correlate`]가 수행합니다.
    pub async fn find_latest(
        &self,
        tenant_id: &str,
        project_id: Option<&str>,
        family: &str,
    ) -> Result<Option<Incident>, DetectError> {
        let row = sqlx::query(
            r"SELECT id, tenant_id, project_id, rule_family, status, severity,
                     detection_count, affected_services, created_at, updated_at, resolved_at
              FROM incidents
              WHERE tenant_id = $1 AND project_id IS NOT DISTINCT FROM $2 AND rule_family = $3
              ORDER BY updated_at DESC
              LIMIT 1",
        )
        .bind(tenant_id)
        .bind(project_id)
        .bind(family)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;

        row.map(|row| Self::row_to_incident(&row)).transpose()
    }

    /// 상관 결정을 적용하고 탐지 이벤트를 저장합니다.
    ///
    /// 대상 인시던트 ID를 반환합니다.
    pub async fn apply(
        &self,
        decision: &CorrelationDecision,
        event: &DetectionEvent,
    ) -> Result<String, DetectError> {
        let incident_id = match decision {
            CorrelationDecision::Open(incident) => {
                let services = serde_json::to_value(&incident.affected_services)
                    .map_err(|e| StorageError::Query(e.to_string()))?;
                sqlx::query(
                    r"INSERT INTO incidents
                        (id, tenant_id, project_id, rule_family, status, severity,
                         detection_count, affected_services, created_at, updated_at)
                      VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                )
                .bind(&incident.id)
                .bind(&incident.tenant_id)
                .bind(incident.project_id.as_deref())
                .bind(&incident.rule_family)
                .bind(incident.status.as_str())
                .bind(incident.severity.as_str())
                .bind(incident.detection_count as i64)
                .bind(&services)
                .bind(incident.created_at)
                .bind(incident.updated_at)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;

                metrics::counter!(logward_core::metrics::INCIDENTS_OPENED_TOTAL).increment(1);
                tracing::info!(
                    incident_id = %incident.id,
                    rule_family = %incident.rule_family,
                    severity = %incident.severity,
                    "incident opened"
                );
                incident.id.clone()
            }
            CorrelationDecision::Append {
                incident_id,
                severity,
                detection_count,
                affected_services,
            } => {
                let services = serde_json::to_value(affected_services)
                    .map_err(|e| StorageError::Query(e.to_string()))?;
                sqlx::query(
                    r"UPDATE incidents
                      SET severity = $2,
                          detection_count = $3,
                          affected_services = $4,
                          updated_at = now()
                      WHERE id = $1",
                )
                .bind(incident_id)
                .bind(severity.as_str())
                .bind(*detection_count as i64)
                .bind(&services)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;

                metrics::counter!(logward_core::metrics::INCIDENTS_APPENDED_TOTAL).increment(1);
                incident_id.clone()
            }
        };

        sqlx::query(
            r"INSERT INTO detection_events
                (id, tenant_id, project_id, rule_id, pack_id, log_id, service,
                 severity, timestamp, message_excerpt, incident_id)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
              ON CONFLICT (id) DO NOTHING",
        )
        .bind(&event.id)
        .bind(&event.tenant_id)
        .bind(event.project_id.as_deref())
        .bind(&event.rule_id)
        .bind(&event.pack_id)
        .bind(&event.log_id)
        .bind(&event.service)
        .bind(event.severity.as_str())
        .bind(event.timestamp)
        .bind(&event.message_excerpt)
        .bind(&incident_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(incident_id)
    }

    fn row_to_incident(row: &sqlx::postgres::PgRow) -> Result<Incident, DetectError> {
        let status_str: String = row.try_get("status").map_err(StorageError::from)?;
        let status = IncidentStatus::from_str_loose(&status_str)
            .ok_or_else(|| StorageError::Query(format!("unknown incident status '{status_str}'")))?;

        let severity_str: String = row.try_get("severity").map_err(StorageError::from)?;
        let severity = Severity::from_str_loose(&severity_str)
            .ok_or_else(|| StorageError::Query(format!("unknown severity '{severity_str}'")))?;

        let services: serde_json::Value = row
            .try_get("affected_services")
            .map_err(StorageError::from)?;
        let affected_services: BTreeSet<String> = serde_json::from_value(services)
            .map_err(|e| StorageError::Query(format!("malformed affected_services: {e}")))?;

        let detection_count: i64 = row.try_get("detection_count").map_err(StorageError::from)?;

        Ok(Incident {
            id: row.try_get("id").map_err(StorageError::from)?,
            tenant_id: row.try_get("tenant_id").map_err(StorageError::from)?,
            project_id: row.try_get("project_id").map_err(StorageError::from)?,
            rule_family: row.try_get("rule_family").map_err(StorageError::from)?,
            status,
            severity,
            detection_count: detection_count.max(0) as u64,
            affected_services,
            created_at: row.try_get("created_at").map_err(StorageError::from)?,
            updated_at: row.try_get("updated_at").map_err(StorageError::from)?,
            resolved_at: row.try_get("resolved_at").map_err(StorageError::from)?,
        })
    }
}

/// 인시던트 상관기
///
/// 탐지 이벤트를 발행 순서대로 받아 인시던트를 생성/갱신합니다.
pub struct IncidentCorrelator {
    store: IncidentStore,
    window: Duration,
}

impl IncidentCorrelator {
    /// 새 상관기를 생성합니다.
    pub fn new(store: IncidentStore, window: Duration) -> Self {
        Self { store, window }
    }

    /// 탐지 이벤트 목록을 순서대로 상관합니다.
    ///
    /// 각 이벤트가 연결된 인시던트 ID 목록을 반환합니다.
    pub async fn record(&self, events: &[DetectionEvent]) -> Result<Vec<String>, DetectError> {
        let mut incident_ids = Vec::with_capacity(events.len());

        for event in events {
            let family = rule_family(&event.rule_id);
            let existing = self
                .store
                .find_latest(&event.tenant_id, event.project_id.as_deref(), family)
                .await?;

            let decision = correlate(existing.as_ref(), event, Utc::now(), self.window);
            let incident_id = self.store.apply(&decision, event).await?;
            incident_ids.push(incident_id);
        }

        Ok(incident_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const WINDOW: Duration = Duration::from_secs(900);

    fn event(rule_id: &str, service: &str, severity: Severity) -> DetectionEvent {
        DetectionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: "acme".to_owned(),
            project_id: Some("web".to_owned()),
            rule_id: rule_id.to_owned(),
            pack_id: "startup-reliability".to_owned(),
            log_id: uuid::Uuid::new_v4().to_string(),
            service: service.to_owned(),
            severity,
            timestamp: Utc::now(),
            message_excerpt: "excerpt".to_owned(),
        }
    }

    fn open_incident(family: &str, updated_at: DateTime<Utc>) -> Incident {
        Incident {
            id: "incident-1".to_owned(),
            tenant_id: "acme".to_owned(),
            project_id: Some("web".to_owned()),
            rule_family: family.to_owned(),
            status: IncidentStatus::Open,
            severity: Severity::High,
            detection_count: 1,
            affected_services: BTreeSet::from(["api".to_owned()]),
            created_at: updated_at,
            updated_at,
            resolved_at: None,
        }
    }

    #[test]
    fn family_strips_numeric_instance_suffix() {
        assert_eq!(rule_family("failed-login-attempts-2"), "failed-login-attempts");
        assert_eq!(rule_family("high-error-rate-10"), "high-error-rate");
        assert_eq!(rule_family("high-error-rate"), "high-error-rate");
        assert_eq!(rule_family("oom-crashes"), "oom-crashes");
        // 숫자 아닌 접미사는 유지됩니다
        assert_eq!(rule_family("rule-v2a"), "rule-v2a");
        assert_eq!(rule_family("42"), "42");
    }

    #[test]
    fn no_existing_incident_opens_new() {
        let event = event("high-error-rate", "api", Severity::High);
        let decision = correlate(None, &event, Utc::now(), WINDOW);

        match decision {
            CorrelationDecision::Open(incident) => {
                assert_eq!(incident.status, IncidentStatus::Open);
                assert_eq!(incident.severity, Severity::High);
                assert_eq!(incident.detection_count, 1);
                assert_eq!(incident.rule_family, "high-error-rate");
                assert!(incident.affected_services.contains("api"));
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn recent_incident_appends_and_lifts_severity() {
        let now = Utc::now();
        let incident = open_incident("high-error-rate", now - TimeDelta::minutes(5));
        let event = event("high-error-rate", "worker", Severity::Critical);

        let decision = correlate(Some(&incident), &event, now, WINDOW);
        match decision {
            CorrelationDecision::Append {
                incident_id,
                severity,
                detection_count,
                affected_services,
            } => {
                assert_eq!(incident_id, "incident-1");
                assert_eq!(severity, Severity::Critical);
                assert_eq!(detection_count, 2);
                assert!(affected_services.contains("api"));
                assert!(affected_services.contains("worker"));
            }
            other => panic!("expected Append, got {other:?}"),
        }
    }

    #[test]
    fn severity_never_downgrades_on_append() {
        let now = Utc::now();
        let incident = open_incident("high-error-rate", now - TimeDelta::minutes(1));
        let event = event("high-error-rate", "api", Severity::Low);

        match correlate(Some(&incident), &event, now, WINDOW) {
            CorrelationDecision::Append { severity, .. } => {
                assert_eq!(severity, Severity::High);
            }
            other => panic!("expected Append, got {other:?}"),
        }
    }

    #[test]
    fn stale_incident_opens_new() {
        let now = Utc::now();
        // 20분 전에 갱신된 인시던트는 윈도우(15분) 밖입니다
        let incident = open_incident("high-error-rate", now - TimeDelta::minutes(20));
        let event = event("high-error-rate", "api", Severity::High);

        assert!(matches!(
            correlate(Some(&incident), &event, now, WINDOW),
            CorrelationDecision::Open(_)
        ));
    }

    #[test]
    fn terminal_incident_is_never_reopened() {
        let now = Utc::now();
        for status in [IncidentStatus::Resolved, IncidentStatus::FalsePositive] {
            let mut incident = open_incident("high-error-rate", now - TimeDelta::minutes(1));
            incident.status = status;
            incident.resolved_at = Some(now);

            let event = event("high-error-rate", "api", Severity::High);
            assert!(matches!(
                correlate(Some(&incident), &event, now, WINDOW),
                CorrelationDecision::Open(_)
            ));
        }
    }

    #[test]
    fn investigating_incident_still_accepts_events() {
        let now = Utc::now();
        let mut incident = open_incident("high-error-rate", now - TimeDelta::minutes(1));
        incident.status = IncidentStatus::Investigating;

        let event = event("high-error-rate", "api", Severity::High);
        assert!(matches!(
            correlate(Some(&incident), &event, now, WINDOW),
            CorrelationDecision::Append { .. }
        ));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let now = Utc::now();
        let incident = open_incident("high-error-rate", now - TimeDelta::seconds(900));
        let event = event("high-error-rate", "api", Severity::High);

        assert!(matches!(
            correlate(Some(&incident), &event, now, WINDOW),
            CorrelationDecision::Append { .. }
        ));
    }

    #[test]
    fn instance_suffixed_rules_share_a_family() {
        let event = event("failed-login-attempts-3", "auth", Severity::Medium);
        match correlate(None, &event, Utc::now(), WINDOW) {
            CorrelationDecision::Open(incident) => {
                assert_eq!(incident.rule_family, "failed-login-attempts");
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }
}
