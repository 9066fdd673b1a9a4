//! Column discovery from stored `CREATE TABLE` text.
//!
//! The scanner understands the four identifier/literal quoting styles SQLite
//! accepts (`'..'`, `".."`, `` `..` ``, `[..]`) and both comment forms, so
//! commas and parentheses inside them never split a definition.

/// Table-level constraint keywords. Multi-word entries must match word by word.
const CONSTRAINT_KEYWORDS: &[&[&str]] = &[
    &["PRIMARY", "KEY"],
    &["FOREIGN", "KEY"],
    &["UNIQUE"],
    &["CHECK"],
    &["CONSTRAINT"],
];

/// Walks `text` byte by byte and reports every byte that is outside quotes and comments.
///
/// The callback receives the byte offset and the byte itself. Multibyte UTF-8
/// sequences never contain ASCII bytes, so offsets reported for ASCII
/// punctuation are always char boundaries.
fn scan_structural(text: &str, mut visit: impl FnMut(usize, u8) -> bool) {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => {
                i = skip_quoted(bytes, i, b);
                continue;
            }
            b'[' => {
                i = skip_quoted(bytes, i, b']');
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                continue;
            }
            _ => {}
        }
        if !visit(i, b) {
            return;
        }
        i += 1;
    }
}

/// Returns the index just past the closing quote that matches the opener at `start`.
///
/// A doubled closing quote (`''`, `""`, ` `` `) is an escape and does not close.
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Byte range of the text between the outermost parentheses, exclusive of both.
fn body_range(create_sql: &str) -> Option<(usize, usize)> {
    let mut open: Option<usize> = None;
    let mut close: Option<usize> = None;
    let mut depth = 0_usize;
    scan_structural(create_sql, |idx, b| {
        match b {
            b'(' => {
                if depth == 0 && open.is_none() {
                    open = Some(idx);
                }
                depth += 1;
            }
            b')' if depth > 0 => {
                depth -= 1;
                if depth == 0 && open.is_some() {
                    close = Some(idx);
                    return false;
                }
            }
            _ => {}
        }
        true
    });
    Some((open? + 1, close?))
}

/// Extract the text between the outermost parentheses of a `CREATE TABLE` statement.
pub fn definition_body(create_sql: &str) -> Option<&str> {
    body_range(create_sql).map(|(start, end)| &create_sql[start..end])
}

/// Split a definition body on commas that sit at parenthesis depth zero.
pub fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut last = 0_usize;
    scan_structural(body, |idx, b| {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&body[last..idx]);
                last = idx + 1;
            }
            _ => {}
        }
        true
    });
    parts.push(&body[last..]);
    parts
}

/// Drop leading whitespace and comments from a fragment.
fn trim_leading_noise(mut fragment: &str) -> &str {
    loop {
        let trimmed = fragment.trim_start();
        if let Some(rest) = trimmed.strip_prefix("--") {
            fragment = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            fragment = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return trimmed;
        }
    }
}

/// Leading bare words of `fragment`, upper-cased, stopping at the first non-word.
fn leading_words(fragment: &str, count: usize) -> Vec<String> {
    let mut words = Vec::with_capacity(count);
    let mut rest = fragment;
    while words.len() < count {
        rest = trim_leading_noise(rest);
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if end == 0 {
            break;
        }
        words.push(rest[..end].to_ascii_uppercase());
        rest = &rest[end..];
    }
    words
}

fn is_table_constraint(fragment: &str) -> bool {
    let words = leading_words(fragment, 2);
    CONSTRAINT_KEYWORDS.iter().any(|keyword| {
        keyword.len() <= words.len()
            && keyword
                .iter()
                .zip(words.iter())
                .all(|(expected, found)| *expected == found.as_str())
    })
}

/// Read the identifier at the start of `fragment`, honouring every quoting style.
fn leading_identifier(fragment: &str) -> Option<String> {
    let mut chars = fragment.chars();
    let first = chars.next()?;
    let close = match first {
        '"' => '"',
        '`' => '`',
        '\'' => '\'',
        '[' => ']',
        _ => {
            let end = fragment
                .find(|c: char| c.is_whitespace() || c == '(' || c == ',')
                .unwrap_or(fragment.len());
            return (end > 0).then(|| fragment[..end].to_string());
        }
    };

    let mut name = String::new();
    let mut iter = fragment[first.len_utf8()..].chars().peekable();
    while let Some(c) = iter.next() {
        if c == close {
            if close != ']' && iter.peek() == Some(&close) {
                name.push(c);
                iter.next();
                continue;
            }
            return Some(name);
        }
        name.push(c);
    }
    // Unterminated quote: take what we have rather than inventing a column.
    (!name.is_empty()).then_some(name)
}

/// Ordered column names declared in a table definition body.
///
/// `definition` is the text between the outermost parentheses of a
/// `CREATE TABLE` statement. Table-level constraints are skipped.
pub fn columns_of(definition: &str) -> Vec<String> {
    split_top_level(definition)
        .into_iter()
        .map(trim_leading_noise)
        .filter(|fragment| !fragment.is_empty())
        .filter(|fragment| !is_table_constraint(fragment))
        .filter_map(leading_identifier)
        .collect()
}

/// True when the statement declares a `WITHOUT ROWID` table.
pub fn is_without_rowid(create_sql: &str) -> bool {
    let Some((_, end)) = body_range(create_sql) else {
        return false;
    };
    let tail = &create_sql[end + 1..];
    let normalized: String = tail
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    normalized.contains("WITHOUT ROWID")
}
