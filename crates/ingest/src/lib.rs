#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`store`]: 로그 레코드 테이블 접근 (배치 삽입, ID 조회)
//! - [`writer`]: 배치 검증과 저장, 커밋 후 작업 제출
//! - [`publisher`]: 채널 알림 게시 (청크 분할)

pub mod publisher;
pub mod store;
pub mod writer;

// --- 주요 타입 re-export ---

pub use publisher::{NotifyPublisher, MAX_LOG_IDS_PER_CHUNK};
pub use store::LogStore;
pub use writer::{IngestBatch, IngestResponse, IngestWriter, PostCommitRunner};
