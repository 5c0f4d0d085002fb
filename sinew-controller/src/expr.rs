//! Safely-compiled ensure expressions.
//!
//! Plans declare postconditions as small expressions over the step result:
//! `result.confidence > 0.9`, `len(result.items) >= 1`,
//! `file_exists(result.path)`. The language is deliberately tiny —
//! attribute access on `result`, literals, comparisons, boolean operators,
//! and a whitelist of builtins (`len`, `file_exists`, `file_contains`).
//! There is no assignment, no indexing, no arithmetic, and any `__` token
//! is rejected at compile time.
//!
//! File-touching builtins cap reads at 10 MiB and substitute non-UTF-8
//! bytes rather than erroring; anything unexpected evaluates to false.

use crate::error::PlanError;
use serde_json::Value;

/// Size cap for `file_contains` reads.
const FILE_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>, PlanError> {
    let err = |message: String| PlanError::validation("ensure", message, "see the ensure expression language");
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Op("."));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut literal = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    literal.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(err(format!("unterminated string literal in {source:?}")));
                }
                i += 1; // closing quote
                tokens.push(Token::Str(literal));
            }
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = match two.as_str() {
                    "==" => Some("=="),
                    "!=" => Some("!="),
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    _ => None,
                };
                if let Some(op) = op {
                    tokens.push(Token::Op(op));
                    i += 2;
                } else if c == '<' {
                    tokens.push(Token::Op("<"));
                    i += 1;
                } else if c == '>' {
                    tokens.push(Token::Op(">"));
                    i += 1;
                } else {
                    return Err(err(format!("unexpected character '{c}' in {source:?}")));
                }
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("bad number literal {text:?}")))?;
                tokens.push(Token::Number(number));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(err(format!("unexpected character '{c}' in {source:?}"))),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    /// `result`, or `result.a.b`.
    ResultPath(Vec<String>),
    Call { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: &'static str,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source: String,
}

impl Parser {
    fn error(&self, message: impl Into<String>) -> PlanError {
        PlanError::validation(
            "ensure",
            format!("{} in {:?}", message.into(), self.source),
            "see the ensure expression language",
        )
    }

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

    fn eat_ident(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn parse_expr(&mut self) -> Result<Expr, PlanError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, PlanError> {
        let mut lhs = self.parse_and()?;
        while self.eat_ident("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, PlanError> {
        let mut lhs = self.parse_not()?;
        while self.eat_ident("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, PlanError> {
        if self.eat_ident("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, PlanError> {
        let lhs = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Op(op @ ("==" | "!=" | "<" | "<=" | ">" | ">="))) => *op,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_primary()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, PlanError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Value::Null)),
                "result" => {
                    let mut path = Vec::new();
                    while matches!(self.peek(), Some(Token::Op("."))) {
                        self.pos += 1;
                        match self.next() {
                            Some(Token::Ident(field)) => path.push(field),
                            _ => return Err(self.error("expected field name after '.'")),
                        }
                    }
                    Ok(Expr::ResultPath(path))
                }
                name => {
                    if !matches!(self.peek(), Some(Token::LParen)) {
                        return Err(self.error(format!("unknown name '{name}'")));
                    }
                    self.pos += 1; // '('
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        loop {
                            args.push(self.parse_expr()?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                _ => return Err(self.error("expected ',' or ')'")),
                            }
                        }
                    } else {
                        self.pos += 1; // ')'
                    }
                    Ok(Expr::Call {
                        name: name.to_string(),
                        args,
                    })
                }
            },
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }
}

/// A compiled ensure expression.
#[derive(Debug, Clone)]
pub struct CompiledEnsure {
    source: String,
    ast: Expr,
}

/// Compile an ensure expression.
///
/// Any `__` token anywhere in the source is rejected here, before parsing:
/// dunder access has no legitimate use in a postcondition.
pub fn compile_ensure(source: &str) -> Result<CompiledEnsure, PlanError> {
    if source.contains("__") {
        return Err(PlanError::validation(
            "ensure",
            format!("ensure expression may not contain dunder names: {source:?}"),
            "remove the '__' token",
        ));
    }
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source: source.to_string(),
    };
    let ast = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing tokens"));
    }
    Ok(CompiledEnsure {
        source: source.to_string(),
        ast,
    })
}

impl CompiledEnsure {
    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a step result. Evaluation errors (missing fields,
    /// type mismatches) are reported as strings; callers treat them as
    /// violations, not crashes.
    pub fn eval(&self, result: &Value) -> Result<bool, String> {
        eval(&self.ast, result).map(|v| truthy(&v))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn eval(expr: &Expr, result: &Value) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::ResultPath(path) => {
            let mut current = result;
            for field in path {
                current = current
                    .get(field)
                    .ok_or_else(|| format!("result has no field '{field}'"))?;
            }
            Ok(current.clone())
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, result)?))),
        Expr::And(lhs, rhs) => {
            let left = eval(lhs, result)?;
            if !truthy(&left) {
                return Ok(left);
            }
            eval(rhs, result)
        }
        Expr::Or(lhs, rhs) => {
            let left = eval(lhs, result)?;
            if truthy(&left) {
                return Ok(left);
            }
            eval(rhs, result)
        }
        Expr::Compare { op, lhs, rhs } => {
            let left = eval(lhs, result)?;
            let right = eval(rhs, result)?;
            compare(op, &left, &right).map(Value::Bool)
        }
        Expr::Call { name, args } => {
            let values: Result<Vec<Value>, String> =
                args.iter().map(|a| eval(a, result)).collect();
            call_builtin(name, &values?)
        }
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, String> {
    match op {
        "==" => Ok(values_equal(left, right)),
        "!=" => Ok(!values_equal(left, right)),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    a.partial_cmp(&b)
                        .ok_or_else(|| "cannot order NaN".to_string())?
                }
                (Value::String(a), Value::String(b)) => a.cmp(b),
                (a, b) => {
                    return Err(format!("cannot order {a} against {b}"));
                }
            };
            Ok(match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                ">=" => ordering.is_ge(),
                _ => false,
            })
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        // Compare numbers numerically so 1 == 1.0.
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        "len" => match args {
            [Value::String(s)] => Ok(Value::from(s.chars().count())),
            [Value::Array(a)] => Ok(Value::from(a.len())),
            [Value::Object(o)] => Ok(Value::from(o.len())),
            [other] => Err(format!("len() not defined for {other}")),
            _ => Err("len() takes exactly one argument".into()),
        },
        "file_exists" => match args {
            [Value::String(path)] => Ok(Value::Bool(std::path::Path::new(path).is_file())),
            _ => Err("file_exists() takes one string argument".into()),
        },
        "file_contains" => match args {
            [Value::String(path), Value::String(needle)] => {
                Ok(Value::Bool(file_contains(path, needle)))
            }
            _ => Err("file_contains() takes (path, substring)".into()),
        },
        other => Err(format!("unknown builtin '{other}'")),
    }
}

/// True when the file exists, is under the size cap, and contains the
/// substring. Binary content is read lossily; every error path is false.
fn file_contains(path: &str, needle: &str) -> bool {
    let path = std::path::Path::new(path);
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() > FILE_SIZE_LIMIT {
        return false;
    }
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).contains(needle),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_str(source: &str, result: &Value) -> Result<bool, String> {
        compile_ensure(source).unwrap().eval(result)
    }

    #[test]
    fn field_comparisons() {
        let result = json!({"confidence": 0.95, "label": "positive"});
        assert!(eval_str("result.confidence > 0.9", &result).unwrap());
        assert!(!eval_str("result.confidence > 0.99", &result).unwrap());
        assert!(eval_str("result.label == 'positive'", &result).unwrap());
        assert!(eval_str("result.label != 'negative'", &result).unwrap());
    }

    #[test]
    fn nested_paths_and_whole_result() {
        let result = json!({"inner": {"score": 3}});
        assert!(eval_str("result.inner.score >= 3", &result).unwrap());
        assert!(eval_str("result", &result).unwrap()); // non-empty object
    }

    #[test]
    fn boolean_operators() {
        let result = json!({"a": 1, "b": 0});
        assert!(eval_str("result.a == 1 and result.b == 0", &result).unwrap());
        assert!(eval_str("result.a == 2 or result.b == 0", &result).unwrap());
        assert!(eval_str("not result.b", &result).unwrap());
        assert!(eval_str("(result.a == 1) and (not (result.b == 1))", &result).unwrap());
    }

    #[test]
    fn len_builtin() {
        let result = json!({"items": [1, 2, 3], "name": "abc"});
        assert!(eval_str("len(result.items) == 3", &result).unwrap());
        assert!(eval_str("len(result.name) >= 3", &result).unwrap());
        assert!(eval_str("len(result) == 2", &result).unwrap());
    }

    #[test]
    fn missing_field_is_an_eval_error_not_a_panic() {
        let result = json!({"a": 1});
        let err = eval_str("result.missing > 1", &result).unwrap_err();
        assert!(err.contains("no field 'missing'"));
    }

    #[test]
    fn dunder_tokens_fail_to_compile() {
        for source in [
            "result.__class__",
            "len(result.__dict__)",
            "result.a == '__x__'",
        ] {
            let err = compile_ensure(source).unwrap_err();
            assert!(matches!(err, PlanError::Validation { .. }), "{source}");
        }
    }

    #[test]
    fn unknown_names_fail_to_compile() {
        assert!(compile_ensure("open('x')").is_err());
        assert!(compile_ensure("exec('x')").is_err());
        assert!(compile_ensure("banana > 1").is_err());
    }

    #[test]
    fn file_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "hello controller").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let result = json!({"path": path_str});
        assert!(eval_str("file_exists(result.path)", &result).unwrap());
        assert!(eval_str("file_contains(result.path, 'controller')", &result).unwrap());
        assert!(!eval_str("file_contains(result.path, 'absent')", &result).unwrap());
        assert!(
            !eval_str("file_exists('/definitely/not/a/real/path')", &json!({})).unwrap()
        );
    }

    #[test]
    fn binary_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin.dat");
        std::fs::write(&path, [0xff, 0xfe, b'o', b'k', 0x00]).unwrap();
        let result = json!({"path": path.to_string_lossy()});
        assert!(eval_str("file_contains(result.path, 'ok')", &result).unwrap());
    }

    #[test]
    fn number_equality_across_int_and_float() {
        let result = json!({"n": 1});
        assert!(eval_str("result.n == 1.0", &result).unwrap());
    }

    #[test]
    fn trailing_tokens_rejected() {
        assert!(compile_ensure("result.a > 1 result.b").is_err());
        assert!(compile_ensure("").is_err());
    }
}
