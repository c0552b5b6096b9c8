//! Extraction of the final result block from an agent's log stream. Agents
//! print arbitrary text around a single JSON object of the form
//! `{"type":"result", ..., "result": "..."}`; this module finds the first
//! such object with a balanced-brace scan that understands strings and
//! escapes, bounded so an unterminated object cannot grow without limit.

const RESULT_MARKER: &str = "\"type\":\"result\"";

/// Find the first complete JSON object in `log` whose body contains the
/// result marker, scanning at most `scan_limit` bytes per candidate object.
pub fn extract_result_block(log: &str, scan_limit: usize) -> Option<serde_json::Value> {
    let mut search_from = 0;
    while let Some(rel) = log[search_from..].find('{') {
        let start = search_from + rel;
        match scan_object(&log[start..], scan_limit) {
            Some(end) => {
                let candidate = &log[start..start + end];
                if candidate_has_marker(candidate)
                    && let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate)
                    && value.get("type").and_then(|t| t.as_str()) == Some("result")
                {
                    return Some(value);
                }
                // Balanced but not a result object: resume after its opening
                // brace so nested objects are still considered.
                search_from = start + 1;
            }
            None => {
                search_from = start + 1;
            }
        }
    }
    None
}

/// The `result` field of the extracted block, if non-empty.
pub fn result_text(block: &serde_json::Value) -> Option<String> {
    block
        .get("result")
        .and_then(|r| r.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Truncate a comment body to `max_len`, keeping the first `truncate_at`
/// characters plus a marker.
pub fn truncate_comment(body: &str, max_len: usize, truncate_at: usize) -> String {
    if body.chars().count() <= max_len {
        return body.to_string();
    }
    let head: String = body.chars().take(truncate_at).collect();
    format!("{}\n\n... (truncated)", head)
}

/// Whitespace-insensitive check for `"type":"result"` within the candidate.
fn candidate_has_marker(candidate: &str) -> bool {
    let compact: String = candidate.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains(RESULT_MARKER)
}

/// Return the byte length of the balanced object starting at `text[0]`
/// (which must be `{`), or None when unbalanced or past `scan_limit`.
fn scan_object(text: &str, scan_limit: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if i > scan_limit {
            return None;
        }
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024 * 1024;

    #[test]
    fn extracts_from_noisy_stream() {
        let log = "building...\nstep ok\n{\"type\":\"result\",\"result\":\"all done\"}\nbye";
        let block = extract_result_block(log, LIMIT).unwrap();
        assert_eq!(result_text(&block).unwrap(), "all done");
    }

    #[test]
    fn handles_nested_braces_and_strings() {
        let log = r#"prefix {"other": 1} mid {"type":"result","data":{"a":"{not a brace}"},"result":"R"} suffix"#;
        let block = extract_result_block(log, LIMIT).unwrap();
        assert_eq!(result_text(&block).unwrap(), "R");
    }

    #[test]
    fn handles_escaped_quotes() {
        let log = r#"{"type":"result","result":"quote \" and slash \\"}"#;
        let block = extract_result_block(log, LIMIT).unwrap();
        assert_eq!(result_text(&block).unwrap(), "quote \" and slash \\");
    }

    #[test]
    fn skips_non_result_objects() {
        let log = r#"{"type":"progress","pct":50} {"type":"result","result":"done"}"#;
        let block = extract_result_block(log, LIMIT).unwrap();
        assert_eq!(result_text(&block).unwrap(), "done");
    }

    #[test]
    fn first_result_object_wins() {
        let log = r#"{"type":"result","result":"first"} {"type":"result","result":"second"}"#;
        let block = extract_result_block(log, LIMIT).unwrap();
        assert_eq!(result_text(&block).unwrap(), "first");
    }

    #[test]
    fn unterminated_object_is_bounded() {
        let mut log = String::from("{\"type\":\"result\",\"result\":\"");
        log.push_str(&"x".repeat(64));
        // No closing quote or brace; the scan gives up at the limit.
        assert!(extract_result_block(&log, 1024).is_none());
    }

    #[test]
    fn whitespace_in_marker_is_tolerated() {
        let log = "{ \"type\" : \"result\" , \"result\" : \"spaced\" }";
        let block = extract_result_block(log, LIMIT).unwrap();
        assert_eq!(result_text(&block).unwrap(), "spaced");
    }

    #[test]
    fn empty_result_field_yields_none() {
        let log = r#"{"type":"result","result":""}"#;
        let block = extract_result_block(log, LIMIT).unwrap();
        assert!(result_text(&block).is_none());
    }

    #[test]
    fn no_result_in_plain_logs() {
        assert!(extract_result_block("just text, no json", LIMIT).is_none());
        assert!(extract_result_block("{\"type\":\"other\"}", LIMIT).is_none());
    }

    #[test]
    fn truncation_keeps_head_and_marker() {
        let body = "r".repeat(10_001);
        let truncated = truncate_comment(&body, 10_000, 9_900);
        assert!(truncated.starts_with(&"r".repeat(9_900)));
        assert!(truncated.ends_with("\n\n... (truncated)"));
        assert_eq!(truncated.chars().filter(|c| *c == 'r').count(), 9_900);

        let short = "r".repeat(10_000);
        assert_eq!(truncate_comment(&short, 10_000, 9_900), short);
    }
}
