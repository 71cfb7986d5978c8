//! EDN encoder.

use std::fmt::Write as _;

use chrono::SecondsFormat;

use super::value::{Keyword, Value};
use crate::error::{DatalogError, Result};

/// Encode a value as EDN text.
pub fn encode(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Append the EDN text of `value` to `out`.
pub fn write_value(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Integer(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => write_float(out, *f),
        Value::BigInt(digits) => {
            let unsigned = digits.strip_prefix('-').unwrap_or(digits);
            if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DatalogError::Encode(format!(
                    "invalid arbitrary-precision integer: {digits:?}"
                )));
            }
            out.push_str(digits);
            out.push('N');
        }
        Value::String(s) => write_string(out, s),
        Value::Instant(at) => {
            out.push_str("#inst ");
            write_string(out, &at.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        Value::Keyword(k) => write_keyword(out, k)?,
        Value::Symbol(s) => {
            if !is_valid_symbol(s) {
                return Err(DatalogError::Encode(format!("invalid symbol: {s:?}")));
            }
            out.push_str(s);
        }
        Value::Raw(text) => out.push_str(text),
        Value::Vector(items) => write_seq(out, "[", items, "]")?,
        Value::List(items) => write_seq(out, "(", items, ")")?,
        Value::Set(items) => write_seq(out, "#{", items, "}")?,
        Value::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, k)?;
                out.push(' ');
                write_value(out, v)?;
            }
            out.push('}');
        }
        Value::Record(record) => {
            out.push('{');
            let mut first = true;
            for (key, value) in record.iter() {
                // Undefined fields are dropped, never written as nil.
                let Some(value) = value else { continue };
                if !first {
                    out.push(' ');
                }
                first = false;
                write_keyword(out, &Keyword::new(key))?;
                out.push(' ');
                write_value(out, value)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Quote and escape a string.
pub fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Quoted, escaped form of a string.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    write_string(&mut out, s);
    out
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("##NaN");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "##Inf" } else { "##-Inf" });
    } else {
        let text = f.to_string();
        out.push_str(&text);
        // Keep the value a float on the reading side.
        if !text.contains(['.', 'e', 'E']) {
            out.push_str(".0");
        }
    }
}

fn write_keyword(out: &mut String, k: &Keyword) -> Result<()> {
    if !is_valid_symbol(k.as_str()) {
        return Err(DatalogError::Encode(format!("invalid keyword: {k}")));
    }
    out.push(':');
    out.push_str(k.as_str());
    Ok(())
}

fn write_seq(out: &mut String, open: &str, items: &[Value], close: &str) -> Result<()> {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(out, item)?;
    }
    out.push_str(close);
    Ok(())
}

fn is_valid_symbol(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit() || c == ':' || c == '#')
        && !s.ends_with('/')
        && s.chars().all(|c| {
            !c.is_whitespace() && !matches!(c, '"' | '(' | ')' | '[' | ']' | '{' | '}' | ',' | ';' | '\\' | '^' | '@' | '~' | '`')
        })
}
