//! Tokenizer for IDB directive lines.
//!
//! A line is a run of tokens separated by spaces. At each position the
//! tokenizer first tries an attribute and falls back to a positional word:
//!
//! ```text
//! line       = { " " } { token { " " } }
//! token      = attribute | positional
//! attribute  = name "(" body ")"
//! name       = lowercase { lowercase }
//! body       = { quoted | any character except `"` and `)` }
//! quoted     = `"` { "\" any | any character except `"` } `"`
//! positional = non-space { non-space }
//! ```
//!
//! The body of an attribute is split into values with shell quoting rules.
//! There are no comments: a `#` is an ordinary character.

use std::borrow::Cow;

/// One token of a directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Positional(&'a str),
    Attribute { name: &'a str, values: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("cannot split the value of attribute `{name}`: `{body}`")]
    UnbalancedQuotes { name: String, body: String },
}

/// Splits a directive line into tokens.
pub fn tokenize(line: &str) -> Result<Vec<Token<'_>>, TokenizeError> {
    let mut tokens = vec![];
    let mut pos = 0;

    while pos < line.len() {
        if line.as_bytes()[pos] == b' ' {
            pos += 1;
            continue;
        }

        if let Some((name, body, end)) = scan_attribute(line, pos) {
            let values = shell_words::split(&escape_hashes(body)).map_err(|_| {
                TokenizeError::UnbalancedQuotes {
                    name: name.to_string(),
                    body: body.to_string(),
                }
            })?;
            tokens.push(Token::Attribute { name, values });
            pos = end;
        } else {
            let end = line[pos..].find(' ').map_or(line.len(), |i| pos + i);
            tokens.push(Token::Positional(&line[pos..end]));
            pos = end;
        }
    }

    Ok(tokens)
}

/// Escapes every unquoted `#`, which `shell_words` would otherwise read as
/// the start of a comment.
fn escape_hashes(body: &str) -> Cow<'_, str> {
    if !body.contains('#') {
        return Cow::Borrowed(body);
    }

    let mut escaped = String::with_capacity(body.len() + 4);
    let mut quote: Option<char> = None;
    let mut backslash = false;
    for c in body.chars() {
        if backslash {
            backslash = false;
        } else {
            match (quote, c) {
                (Some('\''), '\'') | (Some('"'), '"') => quote = None,
                (Some('"'), '\\') | (None, '\\') => backslash = true,
                (None, '\'' | '"') => quote = Some(c),
                (None, '#') => escaped.push('\\'),
                _ => {}
            }
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// Scans `name(body)` starting at `start`.
///
/// Returns the name, the raw body and the offset just past the closing
/// parenthesis, or `None` when the text at `start` is not an attribute.
fn scan_attribute(line: &str, start: usize) -> Option<(&str, &str, usize)> {
    let bytes = line.as_bytes();

    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_lowercase() {
        pos += 1;
    }
    if pos == start || bytes.get(pos) != Some(&b'(') {
        return None;
    }

    let name = &line[start..pos];
    let body_start = pos + 1;
    let mut pos = body_start;
    let mut quoted = false;

    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' if quoted => pos += 1,
            b'"' => quoted = !quoted,
            b')' if !quoted => return Some((name, &line[body_start..pos], pos + 1)),
            _ => {}
        }
        pos += 1;
    }

    None
}
