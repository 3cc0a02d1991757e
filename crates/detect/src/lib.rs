#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`rule`]: 규칙 문서 타입 (logsource, selection, condition)
//! - [`selection`]: 필드 predicate 컴파일/평가 (contains 등 수정자)
//! - [`expr`]: 조건식 파서 (`and`/`or`/`not`/괄호/`1 of`/`all of`)
//! - [`catalog`]: 내장 팩 카탈로그 (로드 시 컴파일, fail-fast)
//! - [`activation`]: 테넌트별 팩 활성화와 임계값 오버라이드
//! - [`evaluator`]: 규칙 평가기 (탐지 이벤트 생성)
//! - [`correlator`]: 인시던트 상관기
//! - [`service`]: 상위 레이어용 팩 조작 인터페이스

pub mod activation;
pub mod catalog;
pub mod correlator;
pub mod evaluator;
pub mod expr;
pub mod rule;
pub mod selection;
pub mod service;

// --- 주요 타입 re-export ---

pub use activation::{
    ActivationSource, ActivationStore, EnablePackOptions, PackActivation, RuleThresholdOverride,
    ThresholdMap,
};
pub use catalog::{CompiledPack, CompiledRule, PackCatalog, PackCategory};
pub use correlator::{CorrelationDecision, IncidentCorrelator, IncidentStore, correlate, rule_family};
pub use evaluator::{ActiveRule, RuleEvaluator};
pub use rule::{Detection, DetectionRule, LogSource, RuleStatus, Selection};
pub use service::{PackService, PackStatusView};
