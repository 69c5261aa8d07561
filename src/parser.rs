//! Call-tree parser for formula text.
//!
//! A formula is plain text with function calls embedded in it. The parser only gives structure
//! to the calls: a run of ASCII letters directly followed by `(` opens a call, whose arguments
//! are themselves text with nested calls. Everything else, including grouping parentheses and
//! operators, stays as text for the expression evaluator.

use crate::error::{CellError, CellResult};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// A piece of formula text.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text(String),
    Call(Call),
}

/// `name(arg,arg,...)`; every argument is a sequence of fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Vec<Fragment>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub fragments: Vec<Fragment>,
}

impl Formula {
    /// The call when the whole formula is exactly one call, ignoring surrounding whitespace.
    pub fn single_call(&self) -> Option<&Call> {
        let mut calls = self.fragments.iter().filter_map(|fragment| match fragment {
            Fragment::Call(call) => Some(call),
            Fragment::Text(_) => None,
        });
        let call = calls.next()?;
        let only_blank_text = self.fragments.iter().all(|fragment| match fragment {
            Fragment::Text(text) => text.trim().is_empty(),
            Fragment::Call(_) => true,
        });
        (calls.next().is_none() && only_blank_text).then_some(call)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Text(text) => f.write_str(text),
            Fragment::Call(call) => write!(f, "{call}"),
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            for fragment in arg {
                write!(f, "{fragment}")?;
            }
        }
        f.write_str(")")
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fragments
            .iter()
            .try_for_each(|fragment| write!(f, "{fragment}"))
    }
}

/// Strip the characters the formula language ignores: `\`, `"` and every `=`.
pub fn clean_formula(formula: &str) -> String {
    formula
        .chars()
        .filter(|ch| !matches!(ch, '\\' | '"' | '='))
        .collect()
}

pub fn parse_formula(text: &str) -> CellResult<Formula> {
    let mut chars = text.chars().peekable();
    let fragments = parse_sequence(&mut chars, false)?;
    Ok(Formula { fragments })
}

/// Parse text until the end of input or, inside an argument list, until a top-level `,` / `)`
/// which is left for the caller.
fn parse_sequence(chars: &mut Peekable<Chars>, in_args: bool) -> CellResult<Vec<Fragment>> {
    let mut fragments = Vec::new();
    let mut text = String::new();
    let mut depth = 0usize;

    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_alphabetic() {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphabetic() {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek() == Some(&'(') {
                chars.next();
                if !text.is_empty() {
                    fragments.push(Fragment::Text(std::mem::take(&mut text)));
                }
                fragments.push(Fragment::Call(parse_call(word, chars)?));
            } else {
                text.push_str(&word);
            }
            continue;
        }

        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            ')' | ',' if in_args && depth == 0 => break,
            ')' => {
                return Err(CellError::ExpressionParse(
                    "unbalanced ')' in formula".to_string(),
                ))
            }
            _ => {}
        }
        text.push(ch);
        chars.next();
    }

    if depth > 0 {
        return Err(CellError::ExpressionParse(
            "unclosed '(' in formula".to_string(),
        ));
    }
    if !text.is_empty() {
        fragments.push(Fragment::Text(text));
    }
    Ok(fragments)
}

/// Parse the arguments of `name(`; the opening parenthesis is already consumed.
fn parse_call(name: String, chars: &mut Peekable<Chars>) -> CellResult<Call> {
    let mut args = Vec::new();
    loop {
        args.push(parse_sequence(chars, true)?);
        match chars.next() {
            Some(',') => continue,
            Some(')') => break,
            _ => {
                return Err(CellError::ExpressionParse(format!(
                    "missing ')' in call to {name}"
                )))
            }
        }
    }

    // `name()` takes no arguments rather than one empty one
    if let [only] = args.as_slice() {
        if only.iter().all(|f| matches!(f, Fragment::Text(t) if t.trim().is_empty())) {
            args.clear();
        }
    }
    Ok(Call { name, args })
}
