/// Collapses whitespace, strips HTML error pages and truncates so upstream bodies
/// stay readable in logs and the activity feed.
pub fn compact_error_message(message: &str, max_len: usize) -> String {
    let mut raw = message.to_string();
    if let Some(idx) = raw.find("<html").or_else(|| raw.find("<!DOCTYPE")) {
        raw.truncate(idx);
        raw.push_str("<html omitted>");
    }
    if let Some((prefix, _)) = raw.split_once("Stack backtrace:") {
        raw = prefix.to_string();
    }

    let mut compact = String::with_capacity(raw.len().min(max_len.saturating_add(16)));
    let mut prev_ws = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !prev_ws && !compact.is_empty() {
                compact.push(' ');
            }
            prev_ws = true;
            continue;
        }
        compact.push(ch);
        prev_ws = false;
        if compact.len() > max_len {
            break;
        }
    }
    if compact.len() <= max_len {
        return compact;
    }
    let mut cut = max_len;
    while cut > 0 && !compact.is_char_boundary(cut) {
        cut -= 1;
    }
    compact.truncate(cut);
    compact.push_str("...(truncated)");
    compact
}

/// Display helper with the default activity-feed length.
pub fn compact_error(err: impl std::fmt::Display) -> String {
    compact_error_message(&err.to_string(), 240)
}

#[cfg(test)]
mod tests {
    use super::compact_error_message;

    #[test]
    fn test_compact_error_message_elides_html_and_backtrace() {
        let raw = "HTTP 502: <html><body>bad gateway</body></html>\nStack backtrace:\n 0: frame";
        let compact = compact_error_message(raw, 260);
        assert!(compact.contains("<html omitted>"));
        assert!(!compact.contains("bad gateway"));
        assert!(!compact.contains("Stack backtrace"));
    }

    #[test]
    fn test_compact_error_message_truncates_on_char_boundary() {
        let raw = "é".repeat(100);
        let compact = compact_error_message(&raw, 11);
        assert!(compact.ends_with("...(truncated)"));
    }
}
