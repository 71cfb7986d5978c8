//! EDN reader for query service responses.

use chrono::{DateTime, Utc};

use super::value::{Keyword, Value};
use crate::error::{DatalogError, Result};

/// Parse exactly one EDN form from `text`.
///
/// An empty document reads as `nil`. Trailing content after the first form
/// is an error.
pub fn parse(text: &str) -> Result<Value> {
    let mut reader = Reader::new(text);
    reader.skip_ws()?;
    if reader.at_end() {
        return Ok(Value::Nil);
    }
    let value = reader.read()?;
    reader.skip_ws()?;
    if !reader.at_end() {
        return Err(reader.error("trailing content after top-level form"));
    }
    Ok(value)
}

struct Reader<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, message: &str) -> DatalogError {
        DatalogError::Decode(format!("{message} at offset {}", self.pos))
    }

    fn skip_ws(&mut self) -> Result<()> {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' | b',' => self.pos += 1,
                b';' => {
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                b'#' if self.bytes.get(self.pos + 1) == Some(&b'_') => {
                    self.pos += 2;
                    self.skip_ws()?;
                    self.read()?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Value> {
        self.skip_ws()?;
        let Some(b) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        match b {
            b'"' => self.read_string().map(Value::String),
            b'[' => self.read_seq(b']').map(Value::Vector),
            b'(' => self.read_seq(b')').map(Value::List),
            b'{' => self.read_map(),
            b':' => {
                self.pos += 1;
                let token = self.read_token();
                if token.is_empty() {
                    return Err(self.error("empty keyword"));
                }
                Ok(Value::Keyword(Keyword::new(token)))
            }
            b'\\' => self.read_char(),
            b'#' => self.read_dispatch(),
            b')' | b']' | b'}' => Err(self.error("unbalanced closing delimiter")),
            _ => {
                let token = self.read_token();
                if token.is_empty() {
                    return Err(self.error("unexpected character"));
                }
                Ok(atom(token))
            }
        }
    }

    fn read_token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn read_string(&mut self) -> Result<String> {
        self.pos += 1;
        let mut out = String::new();
        let mut run_start = self.pos;
        loop {
            let Some(b) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            match b {
                b'"' => {
                    out.push_str(&self.text[run_start..self.pos]);
                    self.pos += 1;
                    return Ok(out);
                }
                b'\\' => {
                    out.push_str(&self.text[run_start..self.pos]);
                    self.pos += 1;
                    let Some(escaped) = self.peek() else {
                        return Err(self.error("unterminated escape"));
                    };
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'u' => {
                            let hex = self
                                .text
                                .get(self.pos..self.pos + 4)
                                .ok_or_else(|| self.error("truncated unicode escape"))?;
                            let code = u32::from_str_radix(hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error("invalid unicode escape"))?;
                            out.push(code);
                            self.pos += 4;
                        }
                        _ => return Err(self.error("invalid string escape")),
                    }
                    run_start = self.pos;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn read_seq(&mut self, close: u8) -> Result<Vec<Value>> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws()?;
            match self.peek() {
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.read()?),
                None => return Err(self.error("unterminated collection")),
            }
        }
    }

    fn read_map(&mut self) -> Result<Value> {
        let items = self.read_seq(b'}')?;
        if items.len() % 2 != 0 {
            return Err(self.error("map literal with odd number of forms"));
        }
        let mut entries = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            entries.push((k, v));
        }
        Ok(Value::Map(entries))
    }

    fn read_char(&mut self) -> Result<Value> {
        self.pos += 1;
        // A delimiter right after the backslash is itself the character.
        let token = if self.peek().is_some_and(is_delimiter) {
            let start = self.pos;
            let c = self.text[start..]
                .chars()
                .next()
                .ok_or_else(|| self.error("empty character literal"))?;
            self.pos += c.len_utf8();
            &self.text[start..self.pos]
        } else {
            self.read_token()
        };
        let c = match token {
            "newline" => "\n".to_string(),
            "space" => " ".to_string(),
            "tab" => "\t".to_string(),
            "return" => "\r".to_string(),
            other => other.to_string(),
        };
        Ok(Value::String(c))
    }

    fn read_dispatch(&mut self) -> Result<Value> {
        self.pos += 1;
        match self.peek() {
            Some(b'{') => self.read_seq(b'}').map(Value::Set),
            Some(b'#') => {
                self.pos += 1;
                match self.read_token() {
                    "NaN" => Ok(Value::Float(f64::NAN)),
                    "Inf" => Ok(Value::Float(f64::INFINITY)),
                    "-Inf" => Ok(Value::Float(f64::NEG_INFINITY)),
                    _ => Err(self.error("unknown symbolic value")),
                }
            }
            _ => {
                let tag = self.read_token();
                let inner = self.read()?;
                match (tag, inner) {
                    ("inst", Value::String(text)) => DateTime::parse_from_rfc3339(&text)
                        .map(|at| Value::Instant(at.with_timezone(&Utc)))
                        .map_err(|e| self.error(&format!("invalid #inst {text:?}: {e}"))),
                    // Tagged literals without a local reader keep their value.
                    (_, inner) => Ok(inner),
                }
            }
        }
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'\t' | b'\n' | b'\r' | b',' | b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'"' | b';'
    )
}

fn atom(token: &str) -> Value {
    match token {
        "nil" => return Value::Nil,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    let numeric = token
        .strip_prefix(['-', '+'])
        .unwrap_or(token)
        .starts_with(|c: char| c.is_ascii_digit());
    if !numeric {
        return Value::Symbol(token.to_string());
    }
    if let Some(digits) = token.strip_suffix('N') {
        return match digits.parse::<i64>() {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::BigInt(digits.trim_start_matches('+').to_string()),
        };
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::Integer(i);
    }
    let decimal = token.strip_suffix('M').unwrap_or(token);
    match decimal.parse::<f64>() {
        Ok(f) => Value::Float(f),
        Err(_) => {
            if token.bytes().skip(1).all(|b| b.is_ascii_digit()) {
                Value::BigInt(token.trim_start_matches('+').to_string())
            } else {
                Value::Symbol(token.to_string())
            }
        }
    }
}
