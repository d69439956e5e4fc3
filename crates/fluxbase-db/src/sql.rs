//! SQL shape sniffing for logging and metrics.
//!
//! These helpers never parse SQL properly; they only recover the leading
//! verb and the first target identifier, which is all the observability
//! surface needs.

/// Maximum query length kept in slow-query log records.
const TRUNCATE_AT: usize = 200;

/// Operation kind inferred from the statement's leading keyword.
pub fn operation_kind(sql: &str) -> &'static str {
    let stripped = strip_leading_trivia(sql);
    let word = stripped
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match word.as_str() {
        "select" => "select",
        "insert" => "insert",
        "update" => "update",
        "delete" => "delete",
        _ => "other",
    }
}

/// Target table inferred from the first FROM/INTO/UPDATE clause.
///
/// The token after the keyword is unquoted and its first dotted identifier
/// kept, so `INSERT INTO auth.users` yields `auth`. Returns `unknown` when
/// no target can be determined.
pub fn table_name(sql: &str) -> String {
    let stripped = strip_leading_trivia(sql);
    let tokens: Vec<&str> = stripped.split_whitespace().collect();

    let mut target = None;
    for (i, token) in tokens.iter().enumerate() {
        let lower = token.to_ascii_lowercase();
        if lower == "from" || lower == "into" {
            target = tokens.get(i + 1);
            break;
        }
        if i == 0 && lower == "update" {
            target = tokens.get(1);
            break;
        }
    }

    let Some(raw) = target else {
        return "unknown".to_string();
    };

    let cleaned = raw
        .trim_end_matches(|c| c == ';' || c == ',' || c == ')')
        .trim_matches('"')
        .trim_matches('`');
    let first = cleaned.split('.').next().unwrap_or_default().trim_matches('"');
    if first.is_empty() {
        "unknown".to_string()
    } else {
        first.to_string()
    }
}

/// Truncate a query for log output, appending a marker when cut.
pub fn truncate_query(sql: &str) -> String {
    let flat = sql.trim();
    if flat.len() <= TRUNCATE_AT {
        return flat.to_string();
    }
    // Cut on a char boundary at or below the limit.
    let mut end = TRUNCATE_AT;
    while !flat.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &flat[..end])
}

/// Skip leading whitespace and SQL comments (`--` and `/* */`).
fn strip_leading_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            match after.find('\n') {
                Some(pos) => {
                    rest = &after[pos + 1..];
                    continue;
                }
                None => return "",
            }
        }
        if let Some(after) = trimmed.strip_prefix("/*") {
            match after.find("*/") {
                Some(pos) => {
                    rest = &after[pos + 2..];
                    continue;
                }
                None => return "",
            }
        }
        return trimmed;
    }
}
