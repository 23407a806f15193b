// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text form of bottles.
//!
//! The text form is what human-facing admin clients see: bare words,
//! quoted strings, numbers, `[vocab]` tags, and parenthesized nesting.
//! Parsing is lenient; rendering always produces re-parseable output
//! (blobs render as a hex word and parse back as strings).

use super::{vocab, vocab_text, Bottle, Value};
use std::fmt;

pub(super) fn render_value(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("(null)"),
        Value::Int(v) => write!(f, "{}", v),
        Value::Float(v) => write!(f, "{}", v),
        Value::Vocab(v) => write!(f, "[{}]", vocab_text(*v)),
        Value::Str(s) => {
            if needs_quoting(s) {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                f.write_str(s)
            }
        }
        Value::Blob(b) => {
            f.write_str("0x")?;
            for byte in b {
                write!(f, "{:02x}", byte)?;
            }
            Ok(())
        }
        Value::List(b) => write!(f, "({})", b),
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"'))
}

/// Parse the text form of a bottle. Unbalanced parentheses close at
/// end of input; garbage tokens become strings.
pub(super) fn parse(text: &str) -> Bottle {
    let mut chars = text.chars().peekable();
    parse_list(&mut chars, 0)
}

fn parse_list(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, depth: usize) -> Bottle {
    let mut out = Bottle::new();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None => break,
            Some(')') => {
                chars.next();
                if depth > 0 {
                    break;
                }
                // Stray closer at top level; skip it.
            }
            Some('(') => {
                chars.next();
                // Keep a hard nesting bound in step with the binary codec.
                if depth < super::codec::MAX_NESTING_DEPTH {
                    out.add(Value::List(parse_list(chars, depth + 1)));
                } else {
                    parse_list(chars, depth + 1);
                }
            }
            Some('[') => {
                chars.next();
                let mut tag = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    tag.push(c);
                }
                out.add_vocab(vocab(&tag));
            }
            Some('"') => {
                chars.next();
                let mut s = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                s.push(escaped);
                            }
                        }
                        other => s.push(other),
                    }
                }
                out.add_string(s);
            }
            Some(_) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '[' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                out.add(parse_word(&word));
            }
        }
    }
    out
}

fn parse_word(word: &str) -> Value {
    if let Ok(v) = word.parse::<i32>() {
        return Value::Int(v);
    }
    if let Ok(v) = word.parse::<f64>() {
        return Value::Float(v);
    }
    Value::Str(word.to_string())
}
