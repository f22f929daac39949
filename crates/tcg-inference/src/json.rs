//! Locating JSON inside free-form model replies
//!
//! Models wrap JSON in prose or Markdown fences. [`extract_json`] returns the
//! first balanced object or array, honoring string escapes.

/// First balanced `{...}` or `[...]` slice in `text`, preferring the body of
/// a ```` ```json ```` fence when present.
#[must_use]
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(fenced) = fenced_body(text) {
        if let Some(found) = first_balanced(fenced) {
            return Some(found);
        }
    }
    first_balanced(text)
}

fn fenced_body(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn first_balanced(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{' || b == b'[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
