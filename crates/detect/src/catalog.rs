//! 탐지 팩 카탈로그 -- 바이너리에 내장된 정적 팩 집합
//!
//! 팩 문서는 `include_str!`로 바이너리에 포함되며, 카탈로그 생성 시
//! 한 번 파싱/컴파일됩니다. 잘못된 조건식이나 수정자는 여기서
//! 거부되므로 출하되는 팩은 시작 시점에 fail-fast합니다.
//!
//! 런타임 동안 팩 집합은 변하지 않습니다. 팩 순서와 팩 내 규칙 선언
//! 순서가 곧 평가 순서입니다.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use logward_core::error::DetectError;

use crate::expr::{ConditionExpr, parse_condition};
use crate::rule::DetectionRule;
use crate::selection::{FieldPredicate, compile_selection};

/// 내장 팩 문서 (출하 세트)
const BUILTIN_PACK_DOCS: &[&str] = &[
    include_str!("packs/startup_reliability.yaml"),
    include_str!("packs/auth_security.yaml"),
    include_str!("packs/database_health.yaml"),
    include_str!("packs/payment_billing.yaml"),
];

/// 팩 카테고리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackCategory {
    /// 서비스 안정성
    Reliability,
    /// 보안
    Security,
    /// 데이터베이스
    Database,
    /// 비즈니스/결제
    Business,
}

impl fmt::Display for PackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliability => write!(f, "reliability"),
            Self::Security => write!(f, "security"),
            Self::Database => write!(f, "database"),
            Self::Business => write!(f, "business"),
        }
    }
}

/// 팩 문서 (역직렬화 형식)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackDocument {
    /// 팩 고유 ID
    pub id: String,
    /// 표시 이름
    pub name: String,
    /// 카테고리
    pub category: PackCategory,
    /// 아이콘 이름 (표시용 메타데이터)
    #[serde(default)]
    pub icon: String,
    /// 작성자
    #[serde(default)]
    pub author: String,
    /// 팩 버전
    #[serde(default)]
    pub version: String,
    /// 규칙 목록 (선언 순서가 평가 순서)
    pub rules: Vec<DetectionRule>,
}

/// 컴파일된 규칙 -- 조건식 AST와 selection predicate를 보관합니다.
#[derive(Debug)]
pub struct CompiledRule {
    /// 원본 규칙
    pub rule: DetectionRule,
    /// 파싱된 조건식
    pub condition: ConditionExpr,
    /// selection 이름 목록 (glob 해석에 사용)
    pub selection_names: Vec<String>,
    /// 컴파일된 selection (이름, predicate 목록)
    pub selections: Vec<(String, Vec<FieldPredicate>)>,
}

impl CompiledRule {
    fn compile(rule: DetectionRule) -> Result<Self, DetectError> {
        rule.validate()?;

        let condition =
            parse_condition(&rule.detection.condition).map_err(|reason| {
                DetectError::ConditionParse {
                    rule_id: rule.id.clone(),
                    reason,
                }
            })?;

        let mut selections = Vec::with_capacity(rule.detection.selections.len());
        for (name, selection) in &rule.detection.selections {
            let predicates =
                compile_selection(selection).map_err(|reason| DetectError::RuleValidation {
                    rule_id: rule.id.clone(),
                    reason,
                })?;
            selections.push((name.clone(), predicates));
        }

        let selection_names = selections.iter().map(|(name, _)| name.clone()).collect();

        Ok(Self {
            rule,
            condition,
            selection_names,
            selections,
        })
    }
}

/// 컴파일된 팩
#[derive(Debug)]
pub struct CompiledPack {
    /// 팩 고유 ID
    pub id: String,
    /// 표시 이름
    pub name: String,
    /// 카테고리
    pub category: PackCategory,
    /// 아이콘 이름
    pub icon: String,
    /// 작성자
    pub author: String,
    /// 팩 버전
    pub version: String,
    /// 컴파일된 규칙 (선언 순서)
    pub rules: Vec<Arc<CompiledRule>>,
}

impl CompiledPack {
    /// 규칙 ID로 규칙을 조회합니다.
    pub fn rule_by_id(&self, rule_id: &str) -> Option<&Arc<CompiledRule>> {
        self.rules.iter().find(|r| r.rule.id == rule_id)
    }
}

/// 탐지 팩 카탈로그
///
/// 프로세스 생존 기간 동안 불변입니다.
pub struct PackCatalog {
    packs: Vec<Arc<CompiledPack>>,
}

impl PackCatalog {
    /// 내장 팩 세트에서 카탈로그를 생성합니다.
    pub fn builtin() -> Result<Self, DetectError> {
        Self::from_documents(BUILTIN_PACK_DOCS)
    }

    /// YAML 문서 목록에서 카탈로그를 생성합니다 (테스트용 진입점).
    pub fn from_documents(docs: &[&str]) -> Result<Self, DetectError> {
        let mut packs = Vec::with_capacity(docs.len());
        let mut seen_packs = HashSet::new();

        for doc in docs {
            let document: PackDocument =
                serde_yaml::from_str(doc).map_err(|e| DetectError::PackLoad {
                    pack_id: "(unparsed)".to_owned(),
                    reason: e.to_string(),
                })?;

            if !seen_packs.insert(document.id.clone()) {
                return Err(DetectError::PackLoad {
                    pack_id: document.id.clone(),
                    reason: "duplicate pack id".to_owned(),
                });
            }

            let mut seen_rules = HashSet::new();
            let mut rules = Vec::with_capacity(document.rules.len());
            for rule in document.rules {
                if !seen_rules.insert(rule.id.clone()) {
                    return Err(DetectError::PackLoad {
                        pack_id: document.id.clone(),
                        reason: format!("duplicate rule id '{}'", rule.id),
                    });
                }
                rules.push(Arc::new(CompiledRule::compile(rule)?));
            }

            packs.push(Arc::new(CompiledPack {
                id: document.id,
                name: document.name,
                category: document.category,
                icon: document.icon,
                author: document.author,
                version: document.version,
                rules,
            }));
        }

        Ok(Self { packs })
    }

    /// 팩 목록을 출하 순서대로 반환합니다.
    pub fn list_packs(&self) -> &[Arc<CompiledPack>] {
        &self.packs
    }

    /// ID로 팩을 조회합니다.
    pub fn pack_by_id(&self, pack_id: &str) -> Option<&Arc<CompiledPack>> {
        self.packs.iter().find(|p| p.id == pack_id)
    }
}
