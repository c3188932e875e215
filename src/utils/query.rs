//! Helpers for building provider queries and normalizing returned text

/// Trim whitespace and the NUL padding some firmware leaves in string fields.
pub fn clean_text(value: &str) -> &str {
    value.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

/// Escape a value for interpolation inside a quoted WQL literal.
pub fn escape_wql(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Parse a provider integer rendered as text, tolerating padding.
pub fn parse_u64(value: &str) -> Option<u64> {
    clean_text(value).parse().ok()
}
