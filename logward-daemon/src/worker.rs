//! Detection-scan job processing.
//!
//! The scan processor is registered with the queue supervisor for the
//! `detection-scan` queue. Each job carries `{tenantId, projectId,
//! logIds}`; the processor hydrates the logs, runs the rule evaluator
//! and hands the resulting detection events to the incident correlator
//! in emission order.
//!
//! Execution is at-least-once: a re-delivered job re-evaluates the same
//! logs. Detection event inserts are idempotent per event id and
//! incidents converge through their correlation keys.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use logward_core::error::QueueError;
use logward_core::job::{Job, JobProcessor, ScanJobPayload, WorkerEvent};
use logward_detect::{IncidentCorrelator, RuleEvaluator};
use logward_ingest::LogStore;

/// Build the detection-scan job processor.
pub fn scan_processor(
    store: Arc<LogStore>,
    evaluator: Arc<RuleEvaluator>,
    correlator: Arc<IncidentCorrelator>,
) -> JobProcessor {
    Arc::new(move |job: Job| {
        let store = Arc::clone(&store);
        let evaluator = Arc::clone(&evaluator);
        let correlator = Arc::clone(&correlator);

        Box::pin(async move {
            let payload: ScanJobPayload = serde_json::from_value(job.payload.clone())
                .map_err(|e| QueueError::Payload(format!("bad scan payload: {e}")))?;

            let logs = store
                .fetch_by_ids(&payload.tenant_id, &payload.log_ids)
                .await
                .map_err(|e| QueueError::Processing(e.to_string()))?;

            if logs.is_empty() {
                tracing::debug!(
                    tenant_id = %payload.tenant_id,
                    requested = payload.log_ids.len(),
                    "scan job found no logs, nothing to do"
                );
                return Ok(());
            }

            let events = evaluator
                .evaluate(&payload.tenant_id, &logs)
                .await
                .map_err(|e| QueueError::Processing(e.to_string()))?;

            if events.is_empty() {
                return Ok(());
            }

            let incident_ids = correlator
                .record(&events)
                .await
                .map_err(|e| QueueError::Processing(e.to_string()))?;

            tracing::info!(
                tenant_id = %payload.tenant_id,
                logs = logs.len(),
                detections = events.len(),
                incidents = incident_ids.len(),
                "scan job completed"
            );
            Ok(())
        })
    })
}

/// Spawn a background task that logs worker events.
///
/// Completed jobs are logged at debug, terminal failures and worker
/// errors at warn/error for operator visibility.
pub fn spawn_worker_event_logger(
    mut events: mpsc::Receiver<WorkerEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(WorkerEvent::Completed(job)) => {
                            tracing::debug!(job_id = %job.id, job_name = %job.name, "job completed");
                        }
                        Some(WorkerEvent::Failed(job, reason)) => {
                            tracing::warn!(
                                job_id = %job.id,
                                job_name = %job.name,
                                attempts = job.attempts,
                                reason = %reason,
                                "job failed permanently"
                            );
                        }
                        Some(WorkerEvent::Error(reason)) => {
                            tracing::error!(reason = %reason, "worker error");
                        }
                        None => {
                            tracing::debug!("worker event channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("worker event logger shutting down");
                    break;
                }
            }
        }
    })
}
