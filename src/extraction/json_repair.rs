//! Best-effort recovery of JSON objects from loosely formatted model output.

/// Extract the first balanced JSON object embedded in `text`.
///
/// Models regularly wrap their JSON in markdown fences or surround it with
/// prose. This scans for the first `{`, then walks forward matching braces
/// while staying aware of string literals and escape sequences, returning
/// the balanced slice. Returns `None` when no object ever closes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse `text` as JSON, recovering an embedded object when the raw parse fails.
pub fn parse_lenient(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    let candidate = extract_json_object(text)?;
    serde_json::from_str(candidate).ok()
}
