//! Statement classification for generated SQL.
//!
//! Generated SQL is untrusted text. Before it reaches the store it is
//! classified as [`StatementKind::Select`] or [`StatementKind::Other`], and
//! `Other` is never executed.

/// Kind of a SQL text as far as execution is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// A single query starting with SELECT, WITH or VALUES
    Select,
    /// Anything else, including multiple statements and empty text
    Other,
}

const QUERY_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES"];

/// Classify SQL text
pub fn classify(sql: &str) -> StatementKind {
    let body = statement_body(sql);
    if body.is_empty() || !skip_leading_comments(trailing_text(sql)).is_empty() {
        return StatementKind::Other;
    }

    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    if QUERY_KEYWORDS.contains(&keyword.as_str()) {
        StatementKind::Select
    } else {
        StatementKind::Other
    }
}

/// The first statement without leading comments, surrounding whitespace or
/// its terminating `;`
pub fn statement_body(sql: &str) -> &str {
    let start = skip_leading_comments(sql);
    match find_terminator(start) {
        Some(end) => start[..end].trim_end(),
        None => start.trim_end(),
    }
}

/// Text after the first statement's `;`, empty when there is none
fn trailing_text(sql: &str) -> &str {
    let start = skip_leading_comments(sql);
    match find_terminator(start) {
        Some(end) => &start[end + 1..],
        None => "",
    }
}

fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(line) = rest.strip_prefix("--") {
            rest = match line.find('\n') {
                Some(end) => line[end + 1..].trim_start(),
                None => "",
            };
        } else if let Some(block) = rest.strip_prefix("/*") {
            rest = match block.find("*/") {
                Some(end) => block[end + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

/// Byte offset of the first `;` outside quotes and comments
fn find_terminator(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                b'\'' | b'"' | b'`' => quote = Some(c),
                b'[' => quote = Some(b']'),
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    i = sql[i..].find('\n').map_or(bytes.len(), |end| i + end);
                    continue;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = sql[i + 2..]
                        .find("*/")
                        .map_or(bytes.len(), |end| i + 2 + end + 2);
                    continue;
                }
                b';' => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}
