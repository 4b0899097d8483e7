//! Small text helpers for log previews and listings.

const ELLIPSIS: char = '…';

/// Collapse every whitespace run (including newlines) to one space.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters, ending with `…` when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max_chars - 1).collect();
    out.truncate(out.trim_end().len());
    out.push(ELLIPSIS);
    out
}

/// Remove common markdown decoration: headings, emphasis markers, inline
/// code ticks and list bullets.
pub fn strip_markdown(s: &str) -> String {
    s.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let body = trimmed.trim_start_matches('#').trim_start();
            let body = body
                .strip_prefix("- ")
                .or_else(|| body.strip_prefix("* "))
                .or_else(|| body.strip_prefix("> "))
                .unwrap_or(body);
            body.chars()
                .filter(|c| !matches!(c, '*' | '`' | '_'))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-line preview of a statement.
pub fn preview(s: &str, max_chars: usize) -> String {
    truncate_chars(&normalize_whitespace(&strip_markdown(s)), max_chars)
}
