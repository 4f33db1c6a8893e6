use crate::normalize::tokens;

/// Lines shown when no query term appears in a chunk.
pub const DEFAULT_SNIPPET_LINES: usize = 4;

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 300;

/// Prepend line numbers to each line of text.
///
/// `start_line` is the number to assign to the first line (1-indexed).
pub fn add_line_numbers(text: &str, start_line: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", start_line + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Short preview of a chunk around the first line containing any query
/// term. Falls back to the opening lines when nothing matches.
pub fn chunk_snippet(content: &str, query: &str) -> Option<String> {
    let lines: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let terms: Vec<String> = tokens(query)
        .into_iter()
        .filter(|t| t.chars().count() > 2)
        .collect();
    let match_idx = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        terms.iter().any(|t| lower.contains(t.as_str()))
    });

    let (start, end) = match match_idx {
        Some(idx) => (idx.saturating_sub(1), (idx + 2).min(lines.len())),
        None => (0, DEFAULT_SNIPPET_LINES.min(lines.len())),
    };

    Some(truncate_chars(
        &lines[start..end].join("\n"),
        DEFAULT_SNIPPET_MAX_CHARS,
    ))
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}

/// Apply line offset and optional line limit to a block of text.
///
/// `start_line` is 1-indexed. If `max_lines` is `Some(n)`, at most `n` lines
/// are returned with a truncation notice appended.
pub fn apply_line_limits(
    text: &str,
    start_line: usize,
    max_lines: Option<usize>,
) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start_idx = start_line.saturating_sub(1);
    if start_idx >= lines.len() {
        return String::new();
    }

    let end_idx = match max_lines {
        Some(max) => (start_idx + max).min(lines.len()),
        None => lines.len(),
    };

    let mut slice = lines[start_idx..end_idx].join("\n");
    if end_idx < lines.len() {
        slice.push_str(&format!(
            "\n\n[... truncated {} more lines]",
            lines.len() - end_idx
        ));
    }

    slice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_line_numbers_custom_start() {
        assert_eq!(add_line_numbers("foo\nbar", 10), "10: foo\n11: bar");
    }

    #[test]
    fn snippet_centers_on_first_matching_line() {
        let content = "Overview of the product.\n\nInstall the agent.\nOpen port 9086 for replication.\nRestart the host.\nCheck the logs.";
        let snippet = chunk_snippet(content, "Replication port").unwrap();
        assert_eq!(
            snippet,
            "Install the agent.\nOpen port 9086 for replication.\nRestart the host."
        );
    }

    #[test]
    fn snippet_without_match_returns_head() {
        let content = "one\ntwo\nthree\nfour\nfive\nsix";
        assert_eq!(
            chunk_snippet(content, "zzz").unwrap(),
            "one\ntwo\nthree\nfour"
        );
    }

    #[test]
    fn snippet_of_blank_content_is_none() {
        assert!(chunk_snippet("\n  \n", "query").is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(400);
        let cut = truncate_chars(&text, DEFAULT_SNIPPET_MAX_CHARS);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), DEFAULT_SNIPPET_MAX_CHARS + 3);
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn apply_line_limits_with_offset() {
        let text = "line1\nline2\nline3\nline4\nline5";
        assert_eq!(apply_line_limits(text, 3, None), "line3\nline4\nline5");
    }

    #[test]
    fn apply_line_limits_offset_and_max() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let result = apply_line_limits(text, 2, Some(2));
        assert!(result.starts_with("line2\nline3"));
        assert!(result.contains("truncated 2 more lines"));
    }

    #[test]
    fn apply_line_limits_past_end() {
        assert!(apply_line_limits("line1\nline2", 100, None).is_empty());
    }
}
