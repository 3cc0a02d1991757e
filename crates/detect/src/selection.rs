//! Selection 컴파일 및 필드 매칭
//!
//! selection의 `필드[|수정자] -> 값` 항목을 [`FieldPredicate`]로
//! 컴파일하고, 로그 레코드에 대해 평가합니다.
//!
//! # 수정자
//! - 없음: 동일성 (값이 리스트면 membership)
//! - `|contains`: 대소문자 무시 부분 문자열 (리스트면 any-match)
//! - `|startswith`, `|endswith`: 대소문자 무시 접두/접미사
//!
//! selection의 모든 predicate는 AND로 결합됩니다.
//! 빈 selection은 false입니다.

use logward_core::types::LogRecord;

use crate::rule::Selection;

/// 매칭 수정자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchModifier {
    /// 동일성 / membership
    Equals,
    /// 대소문자 무시 부분 문자열
    Contains,
    /// 대소문자 무시 접두사
    StartsWith,
    /// 대소문자 무시 접미사
    EndsWith,
}

/// 컴파일된 필드 predicate
#[derive(Debug, Clone)]
pub struct FieldPredicate {
    /// 대상 필드명 (service, level, message, span_id, 또는 속성 키)
    pub field: String,
    /// 매칭 수정자
    pub modifier: MatchModifier,
    /// 매칭할 값 목록 (스칼라는 1개짜리 리스트로 취급, any-match)
    pub values: Vec<serde_json::Value>,
}

/// selection을 predicate 목록으로 컴파일합니다.
///
/// 알 수 없는 수정자는 에러입니다 (팩 로드 시 거부).
pub fn compile_selection(selection: &Selection) -> Result<Vec<FieldPredicate>, String> {
    let mut predicates = Vec::with_capacity(selection.0.len());

    for (key, value) in &selection.0 {
        let (field, modifier) = match key.split_once('|') {
            None => (key.as_str(), MatchModifier::Equals),
            Some((field, "contains")) => (field, MatchModifier::Contains),
            Some((field, "startswith")) => (field, MatchModifier::StartsWith),
            Some((field, "endswith")) => (field, MatchModifier::EndsWith),
            Some((_, modifier)) => {
                return Err(format!("unknown field modifier '|{modifier}' in '{key}'"));
            }
        };

        if field.is_empty() {
            return Err(format!("empty field name in '{key}'"));
        }

        let values = match value {
            serde_json::Value::Array(items) => {
                if items.is_empty() {
                    return Err(format!("empty value list for field '{field}'"));
                }
                items.clone()
            }
            scalar => vec![scalar.clone()],
        };

        predicates.push(FieldPredicate {
            field: field.to_owned(),
            modifier,
            values,
        });
    }

    Ok(predicates)
}

/// 로그에서 필드 값을 추출합니다.
///
/// 내장 필드(service, level, message, span_id) 우선, 그 외에는
/// 최상위 속성에서 찾습니다.
pub fn field_value(log: &LogRecord, field: &str) -> Option<serde_json::Value> {
    match field {
        "service" => Some(serde_json::Value::String(log.service.clone())),
        "level" => Some(serde_json::Value::String(log.level.as_str().to_owned())),
        "message" => Some(serde_json::Value::String(log.message.clone())),
        "span_id" => log
            .span_id
            .as_ref()
            .map(|s| serde_json::Value::String(s.clone())),
        other => log.attributes.get(other).cloned(),
    }
}

/// JSON 값을 비교용 문자열로 변환합니다.
fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 두 스칼라 값의 동일성을 판정합니다.
///
/// 문자열끼리는 대소문자를 무시하고, 그 외에는 JSON 동일성입니다.
fn value_equals(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match (actual, expected) {
        (serde_json::Value::String(a), serde_json::Value::String(b)) => a.eq_ignore_ascii_case(b),
        (a, b) => a == b,
    }
}

/// 단일 predicate를 평가합니다. 필드가 없으면 false입니다.
pub fn predicate_matches(predicate: &FieldPredicate, log: &LogRecord) -> bool {
    let Some(actual) = field_value(log, &predicate.field) else {
        return false;
    };

    match predicate.modifier {
        MatchModifier::Equals => predicate
            .values
            .iter()
            .any(|expected| value_equals(&actual, expected)),
        MatchModifier::Contains => {
            let haystack = value_to_string(&actual).to_lowercase();
            predicate
                .values
                .iter()
                .any(|needle| haystack.contains(&value_to_string(needle).to_lowercase()))
        }
        MatchModifier::StartsWith => {
            let haystack = value_to_string(&actual).to_lowercase();
            predicate
                .values
                .iter()
                .any(|prefix| haystack.starts_with(&value_to_string(prefix).to_lowercase()))
        }
        MatchModifier::EndsWith => {
            let haystack = value_to_string(&actual).to_lowercase();
            predicate
                .values
                .iter()
                .any(|suffix| haystack.ends_with(&value_to_string(suffix).to_lowercase()))
        }
    }
}

/// selection 전체를 평가합니다 (predicate AND 결합).
///
/// 빈 selection은 false를 반환합니다.
pub fn selection_matches(predicates: &[FieldPredicate], log: &LogRecord) -> bool {
    if predicates.is_empty() {
        return false;
    }
    predicates.iter().all(|p| predicate_matches(p, log))
}
