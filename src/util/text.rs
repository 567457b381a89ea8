use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Average adult reading speed used for reading-time estimates.
const WORDS_PER_MINUTE: usize = 238;

/// Ellipsis appended when a string is cut to fit a terminal column.
const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Calculates the display width of a string in terminal columns.
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncates a string to fit within `max_width` terminal columns.
///
/// Appends "..." when text was cut. Widths of 3 or less cut without an
/// ellipsis since there is no room for one.
///
/// ```
/// use myfeed::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, suffix) = if max_width <= ELLIPSIS_WIDTH {
        (max_width, "")
    } else {
        (max_width - ELLIPSIS_WIDTH, ELLIPSIS)
    };

    let mut width = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > budget {
            break;
        }
        width += w;
        end = idx + c.len_utf8();
    }

    Cow::Owned(format!("{}{}", &s[..end], suffix))
}

/// Returns at most `max_chars` characters of `s`, cut on a char boundary.
///
/// Lengths throughout the pipeline are counted in characters, not bytes, so
/// multi-byte scripts get the same budget as ASCII.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Collapses every whitespace run into a single space and trims both ends.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Normalizes extracted article text: whitespace collapsed, trimmed, and
/// capped at `max_chars` characters.
pub fn clean_text(s: &str, max_chars: usize) -> String {
    let collapsed = collapse_whitespace(s);
    truncate_chars(&collapsed, max_chars).trim_end().to_string()
}

/// Strips control characters from user-supplied names (folders, titles).
///
/// Tab and newline are turned into spaces; everything else in the Unicode
/// control category is dropped. Returns `Cow::Borrowed` for clean input.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(char::is_control) {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.chars()
            .filter_map(|c| match c {
                '\t' | '\n' | '\r' => Some(' '),
                c if c.is_control() => None,
                c => Some(c),
            })
            .collect(),
    )
}

/// Estimated reading time in whole minutes, never less than one.
///
/// Returns `None` for empty text.
pub fn estimate_reading_minutes(text: &str) -> Option<usize> {
    let words = text.split_whitespace().count();
    if words == 0 {
        return None;
    }
    Some(words.div_ceil(WORDS_PER_MINUTE).max(1))
}
