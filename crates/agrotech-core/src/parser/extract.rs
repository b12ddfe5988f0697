//! String-aware bracket extraction

/// A candidate JSON span located in free text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub text: &'a str,

    /// Byte offset of the opening delimiter in the source text
    pub start: usize,

    /// `true` when the matching closer was found
    pub complete: bool,
}

/// Locate the first `{` or `[` and the delimiter that closes it
///
/// Depth is counted over both delimiter kinds, and delimiters inside quoted
/// strings (including escaped quotes) are ignored, so prose such as
/// `{"a": 1} and later {"b": 2}` yields only the first object. When the
/// structure never closes, the rest of the text is returned with
/// `complete == false`.
pub fn extract_json_span(text: &str) -> Option<Span<'_>> {
    let start = text.find(&['{', '['][..])?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(Span {
                        text: &text[start..end],
                        start,
                        complete: true,
                    });
                }
            }
            _ => {}
        }
    }

    Some(Span {
        text: &text[start..],
        start,
        complete: false,
    })
}
