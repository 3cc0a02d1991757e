//! Notification chunking properties.
//!
//! The published payload carries only ids, so these properties can be
//! verified without a live channel: chunk count, order preservation,
//! and the payload budget.

use chrono::Utc;

use logward_core::types::LogNotification;
use logward_ingest::MAX_LOG_IDS_PER_CHUNK;
use logward_ingest::publisher::{MAX_PAYLOAD_BYTES, chunk_ids};

fn uuid_ids(n: usize) -> Vec<String> {
    (0..n).map(|_| uuid::Uuid::new_v4().to_string()).collect()
}

#[test]
fn chunk_count_is_ceiling_of_batch_size() {
    for n in [1, 10, MAX_LOG_IDS_PER_CHUNK, MAX_LOG_IDS_PER_CHUNK + 1, 500, 1000] {
        let ids = uuid_ids(n);
        let expected = n.div_ceil(MAX_LOG_IDS_PER_CHUNK);
        assert_eq!(chunk_ids(&ids).len(), expected, "batch of {n}");
    }
}

#[test]
fn five_hundred_log_batch_publishes_three_chunks_in_order() {
    // ⌈500 * 40 / 7900⌉ = 3 notifications whose payloads concatenate
    // to the full id list in order.
    let ids = uuid_ids(500);
    let chunks = chunk_ids(&ids);
    assert_eq!(chunks.len(), 3);

    let concatenated: Vec<String> = chunks.iter().flat_map(|c| c.iter().cloned()).collect();
    assert_eq!(concatenated, ids);
}

#[test]
fn every_chunk_fits_the_payload_budget() {
    let ids = uuid_ids(1000);
    for chunk in chunk_ids(&ids) {
        let notification = LogNotification {
            project_id: "project-with-a-reasonably-long-id".to_owned(),
            log_ids: chunk.to_vec(),
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_string(&notification).unwrap();
        assert!(
            payload.len() <= MAX_PAYLOAD_BYTES,
            "chunk payload {} exceeds budget {}",
            payload.len(),
            MAX_PAYLOAD_BYTES
        );
    }
}

#[test]
fn payload_wire_shape_is_stable() {
    let notification = LogNotification {
        project_id: "p1".to_owned(),
        log_ids: vec!["a".to_owned(), "b".to_owned()],
        timestamp: Utc::now(),
    };
    let value = serde_json::to_value(&notification).unwrap();

    assert!(value.get("projectId").is_some());
    assert!(value.get("logIds").is_some());
    assert!(value.get("timestamp").is_some());
    assert_eq!(value["logIds"].as_array().unwrap().len(), 2);
}
