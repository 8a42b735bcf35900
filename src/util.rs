//! Utility functions for `llamarelay`.
//!
//! Small string helpers shared by the providers, channels and relay.

/// Maximum number of characters of an upstream error body kept in logs and errors.
pub const ERROR_EXCERPT_CHARS: usize = 200;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so multi-byte UTF-8 input (emoji, CJK,
/// accented letters) never panics.
///
/// # Examples
/// ```
/// use llamarelay::util::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
/// assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
/// assert_eq!(truncate_with_ellipsis("", 10), "");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Collapse an upstream error body into a single short line suitable for logs.
pub fn error_excerpt(raw: &str) -> String {
    let single_line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_with_ellipsis(&single_line, ERROR_EXCERPT_CHARS)
}

/// Number of Unicode scalar values in `s`.
///
/// Buffer thresholds are expressed in characters, not bytes.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Length of `s` in UTF-16 code units, the unit Telegram's message limit is counted in.
pub fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Byte index at which to cut `s` so the head fits in `max_units` UTF-16 code units.
///
/// Prefers the end of the last line that fits when it lies in the second half
/// of the window. Always makes progress: a non-empty `s` yields at least one char.
pub fn split_point(s: &str, max_units: usize) -> usize {
    let mut units = 0;
    let mut hard = s.len();
    for (idx, ch) in s.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            hard = idx;
            break;
        }
    }
    if hard == s.len() {
        return hard;
    }
    if hard == 0 {
        return s.chars().next().map_or(0, char::len_utf8);
    }
    match s[..hard].rfind('\n') {
        Some(nl) if nl + 1 > hard / 2 => nl + 1,
        _ => hard,
    }
}
