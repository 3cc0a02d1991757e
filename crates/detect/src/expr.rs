//! 조건식 파서 -- selection 이름을 조합하는 불리언 표현식
//!
//! 지원 문법:
//! ```text
//! expr  := or
//! or    := and ("or" and)*
//! and   := unary ("and" unary)*
//! unary := "not" unary | "(" expr ")" | "1" "of" glob | "all" "of" glob | ident
//! ```
//!
//! `1 of <glob>` / `all of <glob>`의 glob은 `*` 와일드카드를 지원하며,
//! `them`은 `*`의 별칭입니다. 그 외의 형태는 팩 로드 시 거부됩니다.
//!
//! 평가 시 알 수 없는 selection 이름은 false로 단락되며 호출자에게
//! 보고됩니다 (테넌트/규칙당 1회 경고 로깅은 평가기 책임).

use std::fmt;

/// 파싱된 조건식 AST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionExpr {
    /// selection 이름 참조
    Atom(String),
    /// 논리곱
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    /// 논리합
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
    /// 부정
    Not(Box<ConditionExpr>),
    /// glob에 매칭되는 selection 중 하나 이상 참
    OneOf(String),
    /// glob에 매칭되는 selection 전부 참
    AllOf(String),
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(name) => write!(f, "{name}"),
            Self::And(a, b) => write!(f, "({a} and {b})"),
            Self::Or(a, b) => write!(f, "({a} or {b})"),
            Self::Not(inner) => write!(f, "(not {inner})"),
            Self::OneOf(glob) => write!(f, "(1 of {glob})"),
            Self::AllOf(glob) => write!(f, "(all of {glob})"),
        }
    }
}

/// `*` 와일드카드 glob 매칭
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    // 반복적 와일드카드 매칭 (백트래킹 포인터 방식)
    let (mut p, mut n) = (0usize, 0usize);
    let (mut star, mut star_n) = (None::<usize>, 0usize);

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_n = n;
            p += 1;
        } else if let Some(star_p) = star {
            p = star_p + 1;
            star_n += 1;
            n = star_n;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    And,
    Or,
    Not,
    Of,
    One,
    All,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' || c == '*' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '-' || c == '*' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "of" => Token::Of,
                    "1" => Token::One,
                    "all" => Token::All,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<ConditionExpr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = ConditionExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ConditionExpr, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_unary()?;
            left = ConditionExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ConditionExpr, String> {
        match self.next() {
            Some(Token::Not) => Ok(ConditionExpr::Not(Box::new(self.parse_unary()?))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_owned()),
                }
            }
            Some(Token::One) => self.parse_of(true),
            Some(Token::All) => self.parse_of(false),
            Some(Token::Ident(name)) => {
                if name.contains('*') {
                    return Err(format!(
                        "glob '{name}' is only allowed after '1 of' / 'all of'"
                    ));
                }
                Ok(ConditionExpr::Atom(name))
            }
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of condition".to_owned()),
        }
    }

    fn parse_of(&mut self, one: bool) -> Result<ConditionExpr, String> {
        if self.next() != Some(Token::Of) {
            return Err("expected 'of'".to_owned());
        }
        match self.next() {
            Some(Token::Ident(glob)) => {
                // "them"은 전체 selection을 뜻하는 별칭입니다
                let glob = if glob == "them" { "*".to_owned() } else { glob };
                Ok(if one {
                    ConditionExpr::OneOf(glob)
                } else {
                    ConditionExpr::AllOf(glob)
                })
            }
            _ => Err("expected selection glob after 'of'".to_owned()),
        }
    }
}

/// 조건식 문자열을 AST로 파싱합니다.
pub fn parse_condition(input: &str) -> Result<ConditionExpr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty condition".to_owned());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "trailing tokens after condition: {:?}",
            &parser.tokens[parser.pos..]
        ));
    }
    Ok(expr)
}

impl ConditionExpr {
    /// 표현식을 평가합니다.
    ///
    /// `lookup`은 selection 이름에 대한 매칭 결과를 반환하며,
    /// 알 수 없는 이름이면 `None`을 반환합니다. 알 수 없는 atom과
    /// 매칭되는 selection이 없는 glob은 `unknown`에 수집되고 false로
    /// 단락됩니다.
    pub fn evaluate(
        &self,
        names: &[String],
        lookup: &dyn Fn(&str) -> Option<bool>,
        unknown: &mut Vec<String>,
    ) -> bool {
        match self {
            Self::Atom(name) => match lookup(name) {
                Some(result) => result,
                None => {
                    unknown.push(name.clone());
                    false
                }
            },
            Self::And(a, b) => {
                // 단락 없이 양쪽을 평가하여 unknown atom을 모두 수집합니다
                let left = a.evaluate(names, lookup, unknown);
                let right = b.evaluate(names, lookup, unknown);
                left && right
            }
            Self::Or(a, b) => {
                let left = a.evaluate(names, lookup, unknown);
                let right = b.evaluate(names, lookup, unknown);
                left || right
            }
            Self::Not(inner) => !inner.evaluate(names, lookup, unknown),
            Self::OneOf(glob) => {
                let matched: Vec<&String> =
                    names.iter().filter(|n| glob_match(glob, n)).collect();
                if matched.is_empty() {
                    unknown.push(glob.clone());
                    return false;
                }
                matched.iter().any(|n| lookup(n).unwrap_or(false))
            }
            Self::AllOf(glob) => {
                let matched: Vec<&String> =
                    names.iter().filter(|n| glob_match(glob, n)).collect();
                if matched.is_empty() {
                    unknown.push(glob.clone());
                    return false;
                }
                matched.iter().all(|n| lookup(n).unwrap_or(false))
            }
        }
    }
}
