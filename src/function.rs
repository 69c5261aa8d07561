use crate::error::{CellError, CellResult};
use crate::parser::{Call, Formula, Fragment};
use std::fmt;

/// A literal produced by a builtin or by the expression evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for Value {
    /// The literal form spliced back into formula text: `6`, `0.5`, `true`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// The builtin function table. Names are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    IncFrom,
    Text,
    Concat,
    Split,
    Spread,
    Sum,
    Bte,
}

impl Builtin {
    pub const ALL: [Builtin; 7] = [
        Builtin::IncFrom,
        Builtin::Text,
        Builtin::Concat,
        Builtin::Split,
        Builtin::Spread,
        Builtin::Sum,
        Builtin::Bte,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::IncFrom => "incFrom",
            Builtin::Text => "text",
            Builtin::Concat => "concat",
            Builtin::Split => "split",
            Builtin::Spread => "spread",
            Builtin::Sum => "sum",
            Builtin::Bte => "bte",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|builtin| builtin.name() == name)
    }
}

/// Evaluate one leaf call. `args` are the already-reduced, trimmed argument texts.
pub fn call_builtin(name: &str, args: &[&str]) -> CellResult<Value> {
    let call_text = || format!("{name}({})", args.join(","));
    let argument_error = |reason: String| CellError::Argument {
        call: call_text(),
        reason,
    };
    let builtin = Builtin::from_name(name).ok_or_else(|| CellError::UnknownFunction {
        call: call_text(),
    })?;

    let expect_arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(argument_error(format!(
                "{} expects {n} argument(s), got {}",
                builtin.name(),
                args.len()
            )))
        }
    };
    let integer = |arg: &str| {
        arg.parse::<i64>()
            .map_err(|_| argument_error(format!("'{arg}' is not an integer")))
    };
    let numbers = || {
        args.iter()
            .map(|arg| {
                arg.parse::<f64>()
                    .map_err(|_| argument_error(format!("'{arg}' is not a number")))
            })
            .collect::<CellResult<Vec<f64>>>()
    };

    match builtin {
        Builtin::IncFrom => {
            expect_arity(1)?;
            let n = integer(args[0])?;
            n.checked_add(1)
                .map(|n| Value::Number(n as f64))
                .ok_or_else(|| argument_error(format!("{n} + 1 overflows")))
        }
        Builtin::Text => {
            expect_arity(1)?;
            Ok(Value::Text(integer(args[0])?.to_string()))
        }
        Builtin::Concat => Ok(Value::Text(args.concat())),
        Builtin::Split => {
            expect_arity(2)?;
            Ok(Value::Text(split(args[0], args[1])))
        }
        Builtin::Spread => {
            let nums = numbers()?;
            let (min, max) = nums
                .iter()
                .fold(None, |acc: Option<(f64, f64)>, &n| match acc {
                    None => Some((n, n)),
                    Some((min, max)) => Some((min.min(n), max.max(n))),
                })
                .ok_or_else(|| argument_error("spread expects at least one argument".into()))?;
            Ok(Value::Number(max - min))
        }
        Builtin::Sum => Ok(Value::Number(numbers()?.iter().sum())),
        Builtin::Bte => {
            expect_arity(2)?;
            let nums = numbers()?;
            Ok(Value::Bool(nums[0] >= nums[1]))
        }
    }
}

/// Pieces joined with `,` so they splice back into the enclosing argument list.
/// An empty delimiter splits on whitespace.
fn split(text: &str, delimiter: &str) -> String {
    let pieces: Vec<&str> = if delimiter.is_empty() {
        text.split_whitespace().collect()
    } else {
        text.split(delimiter).collect()
    };
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// A formula with every call replaced by its literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub text: String,
    /// Typed result when the formula is exactly one call
    pub value: Option<Value>,
}

/// Reduce every call in the formula, innermost first.
///
/// The first failing call aborts the whole formula; nothing is retried.
pub fn reduce_calls(formula: &Formula) -> CellResult<Reduced> {
    if let Some(call) = formula.single_call() {
        let value = reduce_call(call)?;
        return Ok(Reduced {
            text: value.to_string(),
            value: Some(value),
        });
    }
    Ok(Reduced {
        text: reduce_fragments(&formula.fragments)?,
        value: None,
    })
}

fn reduce_fragments(fragments: &[Fragment]) -> CellResult<String> {
    let mut out = String::new();
    for fragment in fragments {
        match fragment {
            Fragment::Text(text) => out.push_str(text),
            Fragment::Call(call) => out.push_str(&reduce_call(call)?.to_string()),
        }
    }
    Ok(out)
}

/// Arguments are reduced, joined and re-split on `,`, so a call result holding commas
/// (such as `split`) becomes several arguments of the enclosing call.
fn reduce_call(call: &Call) -> CellResult<Value> {
    let reduced = call
        .args
        .iter()
        .map(|arg| reduce_fragments(arg))
        .collect::<CellResult<Vec<String>>>()?;
    let joined = reduced.join(",");
    let args: Vec<&str> = if call.args.is_empty() {
        Vec::new()
    } else {
        joined.split(',').map(str::trim).collect()
    };

    let value = call_builtin(&call.name, &args)?;
    log::debug!("reduced {}({}) -> {value}", call.name, args.join(","));
    Ok(value)
}
