//! 탐지 규칙 데이터 타입
//!
//! 팩 YAML 문서에서 역직렬화되는 구조체들을 정의합니다.
//!
//! # YAML 스키마
//! ```yaml
//! id: failed-login-attempts
//! title: Failed login attempts
//! description: Detects failed authentication messages
//! logsource:
//!   service: auth
//! detection:
//!   selections:
//!     failed_login:
//!       message|contains: ["failed login", "authentication failed"]
//!   condition: failed_login
//! level: medium
//! status: stable
//! tags:
//!   - authentication
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use logward_core::error::DetectError;
use logward_core::types::Severity;

/// 탐지 규칙 -- 팩 문서의 한 항목에 대응합니다.
///
/// 규칙은 불변이며 팩 버전으로 버저닝됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    /// 규칙 고유 ID (팩 내에서 유일해야 함)
    pub id: String,
    /// 규칙 제목 (표시용)
    pub title: String,
    /// 규칙 설명
    #[serde(default)]
    pub description: String,
    /// 로그 소스 셀렉터
    #[serde(default)]
    pub logsource: LogSource,
    /// 탐지 표현식
    pub detection: Detection,
    /// 심각도
    pub level: Severity,
    /// 규칙 상태
    #[serde(default)]
    pub status: RuleStatus,
    /// 분류 태그
    #[serde(default)]
    pub tags: Vec<String>,
    /// 참고 링크
    #[serde(default)]
    pub references: Vec<String>,
}

impl DetectionRule {
    /// 규칙의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.id.is_empty() {
            return Err(DetectError::RuleValidation {
                rule_id: "(empty)".to_owned(),
                reason: "rule id must not be empty".to_owned(),
            });
        }

        if self.id.len() > 256 {
            return Err(DetectError::RuleValidation {
                rule_id: self.id.clone(),
                reason: "rule id must not exceed 256 characters".to_owned(),
            });
        }

        if self.title.is_empty() {
            return Err(DetectError::RuleValidation {
                rule_id: self.id.clone(),
                reason: "rule title must not be empty".to_owned(),
            });
        }

        if self.detection.condition.trim().is_empty() {
            return Err(DetectError::RuleValidation {
                rule_id: self.id.clone(),
                reason: "detection condition must not be empty".to_owned(),
            });
        }

        Ok(())
    }
}

/// 규칙 상태
///
/// `Deprecated`/`Unsupported` 규칙은 로드는 되지만 평가되지 않습니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// 실험적
    Experimental,
    /// 테스트 중
    Test,
    /// 안정 (기본값)
    #[default]
    Stable,
    /// 폐기 예정 -- 평가하지 않음
    Deprecated,
    /// 미지원 -- 평가하지 않음
    Unsupported,
}

impl RuleStatus {
    /// 이 상태의 규칙이 평가 대상인지 확인합니다.
    pub fn is_evaluated(&self) -> bool {
        !matches!(self, Self::Deprecated | Self::Unsupported)
    }
}

/// 로그 소스 셀렉터
///
/// 제공된 필드는 로그의 대응 속성과 정확히 일치해야 하고,
/// 생략된 필드는 와일드카드입니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSource {
    /// 제품 (로그 속성 `product`와 비교)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// 서비스 (로그의 `service` 필드와 비교)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// 카테고리 (로그 속성 `category`와 비교)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl LogSource {
    /// 셀렉터가 아무 필드도 제한하지 않는지 확인합니다.
    pub fn is_wildcard(&self) -> bool {
        self.product.is_none() && self.service.is_none() && self.category.is_none()
    }
}

/// 탐지 표현식 -- 이름 붙은 selection들과 텍스트 condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// 이름 -> selection (필드 조건의 conjunction)
    pub selections: BTreeMap<String, Selection>,
    /// selection 이름들을 조합하는 조건식
    pub condition: String,
}

/// 하나의 selection -- `필드[|수정자] -> 값` 맵
///
/// 값은 스칼라 또는 리스트(any-match)입니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(pub BTreeMap<String, serde_json::Value>);
