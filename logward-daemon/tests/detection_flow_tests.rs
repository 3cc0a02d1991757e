//! End-to-end detection scenarios, exercised in memory.
//!
//! These cover the evaluator and correlator halves of the scan path:
//! a hydrated log batch goes through the rule evaluator, and the
//! resulting detection events go through the correlation policy in
//! emission order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use logward_core::error::DetectError;
use logward_core::job::BoxFuture;
use logward_core::types::{DetectionEvent, Incident, LogLevel, LogRecord, Severity};
use logward_detect::{
    ActivationSource, CorrelationDecision, PackActivation, PackCatalog, RuleEvaluator,
    RuleThresholdOverride, ThresholdMap, correlate, rule_family,
};

const WINDOW: Duration = Duration::from_secs(900);

/// In-memory activation source for tests.
struct StaticActivations(Vec<PackActivation>);

impl ActivationSource for StaticActivations {
    fn activations_for_tenant(
        &self,
        tenant_id: &str,
    ) -> BoxFuture<'_, Result<Vec<PackActivation>, DetectError>> {
        let matching: Vec<PackActivation> = self
            .0
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        Box::pin(async move { Ok(matching) })
    }
}

fn activation(pack_id: &str, thresholds: ThresholdMap) -> PackActivation {
    PackActivation {
        tenant_id: "acme".to_owned(),
        pack_id: pack_id.to_owned(),
        enabled: true,
        thresholds,
        email_recipients: Vec::new(),
        webhook_url: None,
        activated_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn evaluator(activations: Vec<PackActivation>) -> RuleEvaluator {
    RuleEvaluator::new(
        Arc::new(PackCatalog::builtin().unwrap()),
        Arc::new(StaticActivations(activations)),
    )
}

fn log(service: &str, level: LogLevel, message: &str) -> LogRecord {
    LogRecord {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: "acme".to_owned(),
        project_id: Some("web".to_owned()),
        timestamp: Utc::now(),
        service: service.to_owned(),
        level,
        message: message.to_owned(),
        attributes: serde_json::json!({}),
        span_id: None,
    }
}

/// Run the correlation policy over events in emission order, tracking
/// incidents in memory the way the store would.
fn correlate_in_memory(events: &[DetectionEvent]) -> Vec<Incident> {
    let mut incidents: Vec<Incident> = Vec::new();
    let now = Utc::now();

    for event in events {
        let family = rule_family(&event.rule_id).to_owned();
        let existing = incidents
            .iter()
            .filter(|i| {
                i.tenant_id == event.tenant_id
                    && i.project_id == event.project_id
                    && i.rule_family == family
            })
            .max_by_key(|i| i.updated_at)
            .cloned();

        match correlate(existing.as_ref(), event, now, WINDOW) {
            CorrelationDecision::Open(incident) => incidents.push(incident),
            CorrelationDecision::Append {
                incident_id,
                severity,
                detection_count,
                affected_services,
            } => {
                let incident = incidents
                    .iter_mut()
                    .find(|i| i.id == incident_id)
                    .expect("append target must exist");
                incident.severity = severity;
                incident.detection_count = detection_count;
                incident.affected_services = affected_services;
                incident.updated_at = now;
            }
        }
    }

    incidents
}

#[tokio::test]
async fn oom_log_produces_two_critical_detections() {
    // Scenario: one critical log with an OOM message, reliability pack enabled.
    let evaluator = evaluator(vec![activation("startup-reliability", ThresholdMap::new())]);
    let logs = [log("api", LogLevel::Critical, "OOM: heap space exhausted")];

    let events = evaluator.evaluate("acme", &logs).await.unwrap();

    let rule_ids: Vec<&str> = events.iter().map(|e| e.rule_id.as_str()).collect();
    assert_eq!(rule_ids, vec!["critical-errors", "oom-crashes"]);
    assert!(events.iter().all(|e| e.severity == Severity::Critical));

    let incidents = correlate_in_memory(&events);
    let total_detections: u64 = incidents.iter().map(|i| i.detection_count).sum();
    assert_eq!(total_detections, 2);
    assert!(incidents.iter().all(|i| i.severity == Severity::Critical));
    assert!(
        incidents
            .iter()
            .all(|i| i.affected_services == BTreeSet::from(["api".to_owned()]))
    );
}

#[tokio::test]
async fn info_only_batch_produces_no_detections_or_incidents() {
    let evaluator = evaluator(vec![
        activation("startup-reliability", ThresholdMap::new()),
        activation("auth-security", ThresholdMap::new()),
        activation("database-health", ThresholdMap::new()),
        activation("payment-billing", ThresholdMap::new()),
    ]);
    let logs: Vec<LogRecord> = (0..250)
        .map(|i| log("api", LogLevel::Info, &format!("request {i} completed")))
        .collect();

    let events = evaluator.evaluate("acme", &logs).await.unwrap();
    assert!(events.is_empty());
    assert!(correlate_in_memory(&events).is_empty());
}

#[tokio::test]
async fn threshold_override_lifts_failed_login_to_high() {
    // Scenario: auth-security enabled with failed-login-attempts -> high.
    let mut thresholds = ThresholdMap::new();
    thresholds.insert(
        "failed-login-attempts".to_owned(),
        RuleThresholdOverride {
            level: Some(Severity::High),
            ..Default::default()
        },
    );
    let evaluator = evaluator(vec![activation("auth-security", thresholds)]);

    let logs = [log("auth", LogLevel::Warn, "failed login for user=x")];
    let events = evaluator.evaluate("acme", &logs).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule_id, "failed-login-attempts");
    assert_eq!(events[0].severity, Severity::High, "not medium");
}

#[tokio::test]
async fn high_error_rate_is_overridable_to_critical() {
    let mut thresholds = ThresholdMap::new();
    thresholds.insert(
        "high-error-rate".to_owned(),
        RuleThresholdOverride {
            level: Some(Severity::Critical),
            ..Default::default()
        },
    );
    let evaluator = evaluator(vec![activation("startup-reliability", thresholds)]);

    let logs = [log("api", LogLevel::Error, "upstream returned 502")];
    let events = evaluator.evaluate("acme", &logs).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule_id, "high-error-rate");
    assert_eq!(events[0].severity, Severity::Critical);
}

#[tokio::test]
async fn same_family_events_within_window_share_an_incident() {
    let evaluator = evaluator(vec![activation("startup-reliability", ThresholdMap::new())]);
    let logs = [
        log("api", LogLevel::Error, "first failure"),
        log("worker", LogLevel::Error, "second failure"),
    ];

    let events = evaluator.evaluate("acme", &logs).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.rule_id == "high-error-rate"));

    let incidents = correlate_in_memory(&events);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].detection_count, 2);
    assert_eq!(
        incidents[0].affected_services,
        BTreeSet::from(["api".to_owned(), "worker".to_owned()])
    );
}

#[tokio::test]
async fn window_expiry_opens_a_fresh_incident() {
    let evaluator = evaluator(vec![activation("startup-reliability", ThresholdMap::new())]);
    let logs = [log("api", LogLevel::Error, "failure")];
    let events = evaluator.evaluate("acme", &logs).await.unwrap();
    let mut incidents = correlate_in_memory(&events);
    assert_eq!(incidents.len(), 1);

    // 20 minutes pass without updates
    incidents[0].updated_at = Utc::now() - TimeDelta::minutes(20);

    let late_events = evaluator.evaluate("acme", &logs).await.unwrap();
    let decision = correlate(Some(&incidents[0]), &late_events[0], Utc::now(), WINDOW);
    assert!(matches!(decision, CorrelationDecision::Open(_)));
}

#[tokio::test]
async fn tenant_without_activations_sees_nothing() {
    let evaluator = evaluator(vec![activation("startup-reliability", ThresholdMap::new())]);
    let logs = [log("api", LogLevel::Critical, "OOM: heap space exhausted")];

    // Rules are activated for "acme", not for "globex"
    let events = evaluator.evaluate("globex", &logs).await.unwrap();
    assert!(events.is_empty());
}
