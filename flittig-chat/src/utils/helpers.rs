/// Longest frame prefix written to log lines
const LOG_PREVIEW_BYTES: usize = 100;

/// First 100 bytes of a frame for log lines, cut on a char boundary.
pub(crate) fn preview(text: &str) -> &str {
    let mut end = LOG_PREVIEW_BYTES.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Keep at most `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// `None` for missing or blank values. Anything else is kept as given.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "ø".repeat(80);
        assert!(preview(&text).len() <= 100);
        assert!(preview(&text).chars().all(|c| c == 'ø'));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hei", 80), "hei");
        assert_eq!(truncate_chars("æøåæøå", 3), "æøå…");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn test_non_empty_keeps_value_verbatim() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("")), None);
        assert_eq!(non_empty(Some(" \t ")), None);
        assert_eq!(non_empty(Some(" bob")), Some(" bob".to_string()));
    }
}
