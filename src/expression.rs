use crate::error::{CellError, CellResult};
use crate::function::Value;
use std::iter::Peekable;
use std::str::Chars;

/// Characters that mark text as an expression rather than a plain literal.
const EXPRESSION_CHARS: &[char] = &['+', '-', '*', '/', '<', '>', '(', ')'];

/// True for non-numeric text with no operators or parentheses, e.g. `Rent` or `Monthly Rent`.
pub fn is_plain_text(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && !text.contains(EXPRESSION_CHARS) && text.parse::<f64>().is_err()
}

/// Evaluate a literal-only expression.
///
/// Precedence, lowest first: one optional `<` / `>` comparison, `+ -`, `* /`, unary signs.
pub fn evaluate_expression(expr: &str) -> CellResult<Value> {
    let mut chars = expr.chars().peekable();
    skip_whitespace(&mut chars);
    if chars.peek().is_none() {
        return Err(CellError::ExpressionParse("empty expression".to_string()));
    }
    let result = evaluate_comparison(&mut chars)?;
    skip_whitespace(&mut chars);
    if let Some(ch) = chars.peek() {
        return Err(CellError::ExpressionParse(format!(
            "unexpected '{ch}' in '{expr}'"
        )));
    }
    Ok(result)
}

fn evaluate_comparison(chars: &mut Peekable<Chars>) -> CellResult<Value> {
    let lhs = evaluate_sum(chars)?;
    skip_whitespace(chars);
    let Some(&op) = chars.peek().filter(|&&c| c == '<' || c == '>') else {
        return Ok(lhs);
    };
    chars.next();
    let rhs = evaluate_sum(chars)?;
    let (lhs, rhs) = (number(&lhs)?, number(&rhs)?);
    Ok(Value::Bool(if op == '<' { lhs < rhs } else { lhs > rhs }))
}

/// Evaluate a chain of additions and subtractions.
fn evaluate_sum(chars: &mut Peekable<Chars>) -> CellResult<Value> {
    let mut result = evaluate_term(chars)?;
    loop {
        skip_whitespace(chars);
        let Some(&op) = chars.peek().filter(|&&c| c == '+' || c == '-') else {
            return Ok(result);
        };
        chars.next();
        let term = number(&evaluate_term(chars)?)?;
        let acc = number(&result)?;
        result = Value::Number(if op == '+' { acc + term } else { acc - term });
    }
}

/// Evaluate a term (multiplication or division).
fn evaluate_term(chars: &mut Peekable<Chars>) -> CellResult<Value> {
    let mut result = evaluate_factor(chars)?;
    loop {
        skip_whitespace(chars);
        let Some(&op) = chars.peek().filter(|&&c| c == '*' || c == '/') else {
            return Ok(result);
        };
        chars.next();
        let factor = number(&evaluate_factor(chars)?)?;
        let acc = number(&result)?;
        if op == '*' {
            result = Value::Number(acc * factor);
        } else {
            if factor == 0.0 {
                return Err(CellError::ExpressionEvaluation(
                    "division by zero".to_string(),
                ));
            }
            result = Value::Number(acc / factor);
        }
    }
}

/// Evaluate a factor: a signed factor, a number, a boolean or a parenthesised expression.
fn evaluate_factor(chars: &mut Peekable<Chars>) -> CellResult<Value> {
    skip_whitespace(chars);
    let Some(&ch) = chars.peek() else {
        return Err(CellError::ExpressionParse(
            "expression ends where a value was expected".to_string(),
        ));
    };

    match ch {
        '+' | '-' => {
            chars.next();
            let value = number(&evaluate_factor(chars)?)?;
            Ok(Value::Number(if ch == '-' { -value } else { value }))
        }
        '(' => {
            chars.next();
            let value = evaluate_comparison(chars)?;
            skip_whitespace(chars);
            match chars.next() {
                Some(')') => Ok(value),
                _ => Err(CellError::ExpressionParse("missing ')'".to_string())),
            }
        }
        c if c.is_ascii_digit() || c == '.' => {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            literal
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| CellError::ExpressionParse(format!("invalid number '{literal}'")))
        }
        c if c.is_alphabetic() => {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(CellError::ExpressionParse(format!(
                    "unknown identifier '{word}'"
                ))),
            }
        }
        other => Err(CellError::ExpressionParse(format!(
            "unexpected '{other}'"
        ))),
    }
}

fn number(value: &Value) -> CellResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(CellError::ExpressionEvaluation(format!(
            "'{other}' is not a number"
        ))),
    }
}

fn skip_whitespace(chars: &mut Peekable<Chars>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}
