#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`db`]: 기본 스토어 위의 폴링 큐 (`FOR UPDATE SKIP LOCKED`)
//! - [`kv`]: 외부 KV 스토어 큐 (리스트/정렬집합)
//! - [`supervisor`]: 백엔드 선택, 캐싱, start/status/shutdown
//! - [`backoff`]: 잡/연결 재시도 backoff 계산

pub mod backoff;
pub mod db;
pub mod kv;
pub mod supervisor;

// --- 주요 타입 re-export ---

pub use db::{DbQueue, DbWorker};
pub use kv::{KvQueue, KvWorker};
pub use supervisor::QueueSupervisor;
