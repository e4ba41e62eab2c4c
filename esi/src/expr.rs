//! The ESI expression engine used to evaluate `esi:when test="..."`:
//! a lexer, a shunting-yard infix-to-postfix converter, and a
//! typed postfix evaluator that produces a boolean.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::subst::{parse_token, resolve_raw};
use crate::vars::{unquote, Variables};

/// A typed expression value. Parsing/operator tokens live in [`Op`] instead,
/// so this only ever holds operand values once evaluation begins.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Number(i64),
    Str(String),
    Boolean(bool),
    Undefined,
}

impl ExprValue {
    fn as_text(&self) -> String {
        match self {
            ExprValue::Number(n) => n.to_string(),
            ExprValue::Str(s) => s.clone(),
            ExprValue::Boolean(b) => b.to_string(),
            ExprValue::Undefined => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Op {
    /// Higher binds tighter: `|`=1, `&`=2, `!`=3 (unary, right-assoc),
    /// comparisons=4.
    fn precedence(self) -> u8 {
        match self {
            Op::Or => 1,
            Op::And => 2,
            Op::Not => 3,
            Op::Eq | Op::Ne | Op::Ge | Op::Le | Op::Gt | Op::Lt => 4,
            Op::LParen | Op::RParen => 0,
        }
    }

    fn is_right_assoc(self) -> bool {
        matches!(self, Op::Not)
    }

    fn is_binary(self) -> bool {
        matches!(self, Op::And | Op::Or | Op::Eq | Op::Ne | Op::Ge | Op::Le | Op::Gt | Op::Lt)
    }
}

#[derive(Debug, Clone)]
enum Token {
    Value(ExprValue),
    Op(Op),
}

static STRING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^'([^'\\]|\\.)*'").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+(\.\d*)?|\.\d+)").unwrap());
static BOOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(true|false)\b").unwrap());

fn unescape_string_literal(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Classifies a resolved-and-unquoted variable value: `Number` if it parses
/// as an integer or decimal (decimal precision is dropped, only the integer
/// part is kept), `Boolean` for `true`/`false`, otherwise `String`.
fn classify(raw: Option<String>) -> ExprValue {
    let Some(raw) = raw else {
        return ExprValue::Undefined;
    };
    if raw == "true" {
        return ExprValue::Boolean(true);
    }
    if raw == "false" {
        return ExprValue::Boolean(false);
    }
    let unquoted = unquote(&raw);
    if let Some(caps) = NUMBER_RE.captures(&unquoted) {
        if caps[0].len() == unquoted.len() {
            let int_part = unquoted.split('.').next().unwrap_or("0");
            if let Ok(n) = int_part.parse::<i64>() {
                return ExprValue::Number(n);
            }
        }
    }
    ExprValue::Str(unquoted)
}

fn tokenize(input: &str, vars: &dyn Variables) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        let c = rest.chars().next().unwrap();
        if c.is_whitespace() {
            rest = rest.trim_start();
            continue;
        }
        if let Some((var_token, consumed)) = parse_token(rest) {
            tokens.push(Token::Value(classify(resolve_raw(&var_token, vars))));
            rest = &rest[consumed..];
            continue;
        }
        if let Some(m) = STRING_RE.find(rest) {
            tokens.push(Token::Value(ExprValue::Str(unescape_string_literal(m.as_str()))));
            rest = &rest[m.end()..];
            continue;
        }
        if let Some(m) = BOOL_RE.find(rest) {
            tokens.push(Token::Value(ExprValue::Boolean(m.as_str() == "true")));
            rest = &rest[m.end()..];
            continue;
        }
        if let Some(m) = NUMBER_RE.find(rest) {
            let int_part = m.as_str().split('.').next().unwrap_or("0");
            tokens.push(Token::Value(ExprValue::Number(int_part.parse().ok()?)));
            rest = &rest[m.end()..];
            continue;
        }
        if let Some(op_rest) = rest.strip_prefix("==") {
            tokens.push(Token::Op(Op::Eq));
            rest = op_rest;
            continue;
        }
        if let Some(op_rest) = rest.strip_prefix("!=") {
            tokens.push(Token::Op(Op::Ne));
            rest = op_rest;
            continue;
        }
        if let Some(op_rest) = rest.strip_prefix(">=") {
            tokens.push(Token::Op(Op::Ge));
            rest = op_rest;
            continue;
        }
        if let Some(op_rest) = rest.strip_prefix("<=") {
            tokens.push(Token::Op(Op::Le));
            rest = op_rest;
            continue;
        }
        let (op, len) = match c {
            '(' => (Op::LParen, 1),
            ')' => (Op::RParen, 1),
            '!' => (Op::Not, 1),
            '&' => (Op::And, 1),
            '|' => (Op::Or, 1),
            '>' => (Op::Gt, 1),
            '<' => (Op::Lt, 1),
            _ => return None,
        };
        tokens.push(Token::Op(op));
        rest = &rest[len..];
    }
    Some(tokens)
}

/// Converts infix tokens to postfix via the shunting-yard algorithm.
/// Returns `None` on mismatched parentheses.
fn to_postfix(tokens: Vec<Token>) -> Option<Vec<Token>> {
    let mut output = Vec::new();
    let mut ops: Vec<Op> = Vec::new();

    for token in tokens {
        match token {
            Token::Value(_) => output.push(token),
            Token::Op(Op::LParen) => ops.push(Op::LParen),
            Token::Op(Op::RParen) => loop {
                match ops.pop() {
                    Some(Op::LParen) => break,
                    Some(op) => output.push(Token::Op(op)),
                    None => return None,
                }
            },
            Token::Op(op) => {
                while let Some(&top) = ops.last() {
                    if top == Op::LParen {
                        break;
                    }
                    let should_pop = if op.is_right_assoc() {
                        top.precedence() > op.precedence()
                    } else {
                        top.precedence() >= op.precedence()
                    };
                    if should_pop {
                        output.push(Token::Op(ops.pop().unwrap()));
                    } else {
                        break;
                    }
                }
                ops.push(op);
            }
        }
    }
    while let Some(op) = ops.pop() {
        if op == Op::LParen {
            return None;
        }
        output.push(Token::Op(op));
    }
    Some(output)
}

fn compare(lhs: &ExprValue, rhs: &ExprValue, op: Op) -> ExprValue {
    if matches!(lhs, ExprValue::Undefined) || matches!(rhs, ExprValue::Undefined) {
        return ExprValue::Boolean(false);
    }
    let ordering = match (lhs, rhs) {
        (ExprValue::Number(a), ExprValue::Number(b)) => a.cmp(b),
        _ => lhs.as_text().cmp(&rhs.as_text()),
    };
    let result = match op {
        Op::Eq => ordering.is_eq(),
        Op::Ne => ordering.is_ne(),
        Op::Gt => ordering.is_gt(),
        Op::Lt => ordering.is_lt(),
        Op::Ge => ordering.is_ge(),
        Op::Le => ordering.is_le(),
        _ => unreachable!(),
    };
    ExprValue::Boolean(result)
}

fn eval_postfix(postfix: Vec<Token>) -> Option<ExprValue> {
    let mut stack: Vec<ExprValue> = Vec::new();
    for token in postfix {
        match token {
            Token::Value(v) => stack.push(v),
            Token::Op(Op::Not) => {
                let v = stack.pop()?;
                stack.push(match v {
                    ExprValue::Boolean(b) => ExprValue::Boolean(!b),
                    _ => ExprValue::Undefined,
                });
            }
            Token::Op(op) if op.is_binary() => {
                let rhs = stack.pop()?;
                let lhs = stack.pop()?;
                let result = match op {
                    Op::And => match (lhs, rhs) {
                        (ExprValue::Boolean(a), ExprValue::Boolean(b)) => ExprValue::Boolean(a && b),
                        _ => ExprValue::Undefined,
                    },
                    Op::Or => match (lhs, rhs) {
                        (ExprValue::Boolean(a), ExprValue::Boolean(b)) => ExprValue::Boolean(a || b),
                        _ => ExprValue::Undefined,
                    },
                    _ => compare(&lhs, &rhs, op),
                };
                stack.push(result);
            }
            Token::Op(_) => return None,
        }
    }
    if stack.len() == 1 {
        stack.pop()
    } else {
        None
    }
}

/// Evaluates a `test="..."` expression, returning `true` only if the single
/// result is the boolean `true`; any other outcome (parse failure,
/// `Undefined`, or leftover operands) yields `false`.
pub fn evaluate(expr: &str, vars: &dyn Variables) -> bool {
    let Some(tokens) = tokenize(expr, vars) else {
        return false;
    };
    let Some(postfix) = to_postfix(tokens) else {
        return false;
    };
    matches!(eval_postfix(postfix), Some(ExprValue::Boolean(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::RequestVariables;
    use http::HeaderMap;
    use url::Url;

    fn novars() -> RequestVariables {
        RequestVariables::from_request(&Url::parse("http://example.com/").unwrap(), &HeaderMap::new())
    }

    #[test]
    fn string_equality() {
        assert!(evaluate("'a' == 'a'", &novars()));
        assert!(!evaluate("'a' == 'b'", &novars()));
    }

    #[test]
    fn numeric_comparison() {
        assert!(evaluate("2 > 1", &novars()));
        assert!(!evaluate("1 >= 2", &novars()));
    }

    #[test]
    fn logical_and_or_not() {
        assert!(evaluate("true & !false", &novars()));
        assert!(evaluate("false | true", &novars()));
        assert!(!evaluate("false & true", &novars()));
    }

    #[test]
    fn parentheses_group_precedence() {
        assert!(evaluate("(1 == 1) & (2 == 2)", &novars()));
    }

    #[test]
    fn mismatched_parens_is_false() {
        assert!(!evaluate("(1 == 1", &novars()));
        assert!(!evaluate("1 == 1)", &novars()));
    }

    #[test]
    fn undefined_comparison_is_false() {
        let v = novars();
        assert!(!evaluate("$(NOPE) == 'x'", &v));
    }

    #[test]
    fn variable_substitution_in_expression() {
        let mut h = HeaderMap::new();
        h.insert("host", http::HeaderValue::from_static("example.com"));
        let vars = RequestVariables::from_request(&Url::parse("http://x/").unwrap(), &h);
        assert!(evaluate("$(HTTP_HOST) == 'example.com'", &vars));
    }
}
