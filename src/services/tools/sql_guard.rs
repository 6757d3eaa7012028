//! Read-only SQL guard for agent-issued queries.
//!
//! Inspection runs on a masked copy of the statement in which comments,
//! quoted literals and quoted identifiers are blanked out.

use serde::Serialize;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "MERGE", "REPLACE",
    "GRANT", "REVOKE", "EXEC", "EXECUTE", "CALL", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "COPY",
    "INTO",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlValidation {
    pub valid: bool,
    /// First problem found, if any.
    pub reason: Option<String>,
    pub issues: Vec<String>,
}

impl SqlValidation {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            valid: issues.is_empty(),
            reason: issues.first().cloned(),
            issues,
        }
    }
}

/// Replace comments and quoted sections with spaces, keeping character positions.
pub fn mask(sql: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Quoted(char),
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Code => match (c, next) {
                ('-', Some('-')) => {
                    state = State::LineComment;
                    out.push_str("  ");
                    i += 1;
                }
                ('/', Some('*')) => {
                    state = State::BlockComment;
                    out.push_str("  ");
                    i += 1;
                }
                ('\'' | '"' | '`', _) => {
                    state = State::Quoted(c);
                    out.push(' ');
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = State::Code;
                    out.push_str("  ");
                    i += 1;
                } else {
                    out.push(' ');
                }
            }
            State::Quoted(quote) => {
                if c == quote && next == Some(quote) {
                    out.push_str("  ");
                    i += 1;
                } else if c == quote {
                    state = State::Code;
                    out.push(' ');
                } else {
                    out.push(' ');
                }
            }
        }
        i += 1;
    }
    out
}

/// Statement text without a single trailing `;` and surrounding whitespace.
pub fn strip_terminator(sql: &str) -> &str {
    let trimmed = sql.trim_end();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim()
}

/// The original statement minus a trailing `;`, located on the masked text so
/// a terminator followed by a comment is still found.
pub fn without_terminator(sql: &str) -> String {
    let masked: Vec<char> = mask(sql).chars().collect();
    let last = masked.iter().rposition(|c| !c.is_whitespace());
    match last {
        Some(index) if masked[index] == ';' => {
            sql.chars().take(index).collect::<String>().trim().to_string()
        }
        _ => sql.trim().to_string(),
    }
}

/// Check that `sql` is a single read-only `SELECT`.
pub fn validate(sql: &str) -> SqlValidation {
    let mut issues = Vec::new();
    let masked = mask(sql);
    let body = strip_terminator(&masked);

    if body.is_empty() {
        return SqlValidation::from_issues(vec!["query is empty".to_string()]);
    }

    if body.contains(';') {
        issues.push("multiple statements are not allowed".to_string());
    }

    let words: Vec<String> = body
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();

    if words.first().map(String::as_str) != Some("SELECT") {
        issues.push("only SELECT statements are allowed".to_string());
    }

    for keyword in FORBIDDEN_KEYWORDS {
        if words.iter().any(|w| w == keyword) {
            issues.push(format!("forbidden keyword: {keyword}"));
        }
    }

    let mut depth: i64 = 0;
    for c in body.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }
    if depth != 0 {
        issues.push("unbalanced parentheses".to_string());
    }

    SqlValidation::from_issues(issues)
}
