//! Python source helpers: string-literal encoding and a lexical
//! well-formedness check.

use std::fmt::Write as _;

/// Encode `value` as a double-quoted Python string literal.
///
/// The result is pure ASCII: quotes, backslashes and control characters are
/// escaped, and every non-ASCII character becomes a `\u`/`\U` escape.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c if c.is_ascii() => out.push(c),
            c if (c as u32) <= 0xffff => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => {
                let _ = write!(out, "\\U{:08x}", c as u32);
            }
        }
    }
    out.push('"');
    out
}

/// Decode a literal produced by [`string_literal`]. Returns `None` for
/// anything that is not such a literal.
pub fn decode_string_literal(literal: &str) -> Option<String> {
    let inner = literal.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return None,
            '\\' => {
                let escaped = match chars.next()? {
                    '\\' => '\\',
                    '"' => '"',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    'x' => hex_char(&mut chars, 2)?,
                    'u' => hex_char(&mut chars, 4)?,
                    'U' => hex_char(&mut chars, 8)?,
                    _ => return None,
                };
                out.push(escaped);
            }
            c => out.push(c),
        }
    }
    Some(out)
}

fn hex_char(chars: &mut std::str::Chars<'_>, digits: usize) -> Option<char> {
    let hex: String = chars.take(digits).collect();
    if hex.len() != digits {
        return None;
    }
    char::from_u32(u32::from_str_radix(&hex, 16).ok()?)
}

/// A lexical defect in Python source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub message: String,
}

/// Check that `source` is lexically well-formed Python: every string
/// literal is terminated and every bracket is balanced. Comments and
/// string contents are skipped.
pub fn check_syntax(source: &str) -> Result<(), SyntaxIssue> {
    let chars: Vec<char> = source.chars().collect();
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                i = skip_string(&chars, i, &mut line)?;
            }
            '(' | '[' | '{' => {
                brackets.push((c, line));
                i += 1;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(SyntaxIssue {
                            line,
                            message: format!(
                                "'{}' does not match '{}' opened on line {}",
                                c, open, open_line
                            ),
                        })
                    }
                    None => {
                        return Err(SyntaxIssue {
                            line,
                            message: format!("unmatched '{}'", c),
                        })
                    }
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    match brackets.pop() {
        Some((open, open_line)) => Err(SyntaxIssue {
            line: open_line,
            message: format!("'{}' was never closed", open),
        }),
        None => Ok(()),
    }
}

/// Skip the string literal whose opening quote is at `start`, returning the
/// index just past its closing quote.
fn skip_string(chars: &[char], start: usize, line: &mut usize) -> Result<usize, SyntaxIssue> {
    let quote = chars[start];
    let start_line = *line;
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                // Escapes (and line continuations) consume the next char,
                // in raw strings too.
                if chars.get(i + 1) == Some(&'\n') {
                    *line += 1;
                }
                i += 2;
            }
            '\n' if !triple => {
                return Err(SyntaxIssue {
                    line: start_line,
                    message: "unterminated string literal".to_string(),
                })
            }
            '\n' => {
                *line += 1;
                i += 1;
            }
            c if c == quote => {
                if !triple {
                    return Ok(i + 1);
                }
                if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                    return Ok(i + 3);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    Err(SyntaxIssue {
        line: start_line,
        message: if triple {
            "unterminated triple-quoted string".to_string()
        } else {
            "unterminated string literal".to_string()
        },
    })
}
