/// Lines shown when no query word matches.
pub const DEFAULT_SNIPPET_LINES: usize = 6;

/// Characters kept in a snippet before it is cut.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 400;

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Extract a snippet around the first line mentioning any word of `query`.
///
/// Returns `(snippet_text, start_line_number)` where start_line_number is
/// 1-indexed. Without a match, returns the first few lines.
/// Returns `None` if the text has no non-blank line.
pub fn extract_snippet(text: &str, query: &str) -> Option<(String, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return None;
    }

    let words: Vec<String> = query
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect();
    let match_idx = lines.iter().position(|line| {
        let line = line.to_lowercase();
        words.iter().any(|w| line.contains(w.as_str()))
    });

    let (start, end) = if let Some(idx) = match_idx {
        let start = idx.saturating_sub(2);
        let end = (idx + 3).min(lines.len());
        (start, end)
    } else {
        (0, DEFAULT_SNIPPET_LINES.min(lines.len()))
    };

    let snippet = lines[start..end].join("\n");
    Some((truncate_chars(&snippet, DEFAULT_SNIPPET_MAX_CHARS), start + 1))
}
