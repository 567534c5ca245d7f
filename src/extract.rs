//! Defensive JSON extraction from free-form model output.
//!
//! Models asked for "ONLY JSON" still wrap it in prose or code fences often
//! enough that every structured call path extracts the first balanced JSON
//! substring instead of parsing the raw text. Callers treat extraction or
//! parse failure as "no data", never as an error.

/// First balanced `[...]` substring, or `None`.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, '[', ']')
}

/// First balanced `{...}` substring, or `None`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, '{', '}')
}

/// Scan for the first `open` and return the substring up to its matching
/// `close`, tracking nesting depth and skipping string literals.
fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
