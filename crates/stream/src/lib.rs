#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`listener`]: 단일 장기 연결 LISTEN, 재연결 상태 기계
//! - [`registry`]: 연결별 구독자 맵과 팬아웃 라우팅

pub mod listener;
pub mod registry;

// --- 주요 타입 re-export ---

pub use listener::{ListenerEvent, ListenerState, ListenerStatus, NotifyListener};
pub use registry::{
    DeliveryCallback, Subscriber, SubscriberFilter, SubscriberRegistry, filter_matches_logs,
};
