//! Response parsing (§4.6 "Response parsing"): turns the LLM's raw
//! completion text into a structured terminal, tolerating the formatting
//! quirks models routinely introduce around an otherwise-valid JSON payload.

use serde::Deserialize;

use crate::loop_state::ConversationStatus;

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub text: String,
    pub status: ConversationStatus,
    pub urgent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct RawResponse {
    response: serde_json::Value,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    urgent: Option<bool>,
}

/// Parse a completion's text content into a [`ParsedResponse`]. The
/// expected shape is `{"response": string, "status"?: string, "urgent"?:
/// bool}`; this tolerates a fenced code block, a leading `[HH:MM]`
/// timestamp prefix, and `<msg_time>...</msg_time>` framing around it.
pub fn parse_response(raw: &str, allow_plain_text: bool) -> Result<ParsedResponse, ParseError> {
    let cleaned = strip_msg_time(raw.trim());
    let cleaned = strip_timestamp_prefix(&cleaned);
    let candidate = unfence(&cleaned);

    match serde_json::from_str::<RawResponse>(&candidate) {
        Ok(parsed) => {
            let text = match parsed.response {
                serde_json::Value::String(s) => s,
                _ => return Err(ParseError::Malformed("`response` field is not a string".to_string())),
            };
            let status = parsed.status.as_deref().map(parse_status).unwrap_or(ConversationStatus::Active);
            Ok(ParsedResponse { text, status, urgent: parsed.urgent.unwrap_or(false) })
        }
        Err(e) => {
            if looks_like_tool_call_attempt(&candidate) {
                return Err(ParseError::Malformed(
                    "response looks like an XML-style tool invocation, not a JSON response".to_string(),
                ));
            }
            if allow_plain_text && !candidate.is_empty() {
                Ok(ParsedResponse { text: candidate, status: ConversationStatus::Active, urgent: false })
            } else {
                Err(ParseError::Malformed(format!("response is not valid JSON: {e}")))
            }
        }
    }
}

fn parse_status(s: &str) -> ConversationStatus {
    match s {
        "awaiting_answer" => ConversationStatus::AwaitingAnswer,
        "closed" => ConversationStatus::Closed,
        "idle" => ConversationStatus::Idle,
        _ => ConversationStatus::Active,
    }
}

/// Strips a leading `[HH:MM]` or `[HH:MM:SS]` timestamp some models prepend
/// before the JSON payload.
fn strip_timestamp_prefix(s: &str) -> String {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            let inner = &rest[..close];
            let looks_like_clock = inner.len() <= 8 && inner.contains(':') && inner.chars().all(|c| c.is_ascii_digit() || c == ':');
            if looks_like_clock {
                return rest[close + 1..].trim_start().to_string();
            }
        }
    }
    s.to_string()
}

/// Strips a `<msg_time>...</msg_time>` tag some models wrap the payload in
/// as a timestamp framing artifact, keeping whatever surrounds it.
fn strip_msg_time(s: &str) -> String {
    const OPEN: &str = "<msg_time>";
    const CLOSE: &str = "</msg_time>";
    match (s.find(OPEN), s.find(CLOSE)) {
        (Some(start), Some(end)) if end > start => {
            let mut out = String::with_capacity(s.len());
            out.push_str(&s[..start]);
            out.push_str(&s[end + CLOSE.len()..]);
            out.trim().to_string()
        }
        _ => s.to_string(),
    }
}

/// Unwraps a ```` ```json ... ``` ```` or bare ```` ``` ... ``` ```` fence.
fn unfence(s: &str) -> String {
    let trimmed = s.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_fence = &trimmed[start + 3..];
    let after_lang = after_fence.trim_start_matches(|c: char| c.is_alphabetic());
    let end = after_lang.find("```").unwrap_or(after_lang.len());
    after_lang[..end].trim().to_string()
}

/// Detects a model that tried to hand-write a tool call as XML-ish markup
/// instead of using the tool-calling channel, e.g. `<core.say>hi</core.say>`.
fn looks_like_tool_call_attempt(s: &str) -> bool {
    s.starts_with('<') && s.contains('.') && s.contains('>') && !s.starts_with("<msg_time>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let parsed = parse_response(r#"{"response": "hi there"}"#, false).unwrap();
        assert_eq!(parsed.text, "hi there");
        assert_eq!(parsed.status, ConversationStatus::Active);
        assert!(!parsed.urgent);
    }

    #[test]
    fn parses_full_shape_with_status_and_urgent() {
        let parsed = parse_response(r#"{"response": "ok", "status": "awaiting_answer", "urgent": true}"#, false).unwrap();
        assert_eq!(parsed.status, ConversationStatus::AwaitingAnswer);
        assert!(parsed.urgent);
    }

    #[test]
    fn tolerates_fenced_code_block() {
        let raw = "```json\n{\"response\": \"fenced\"}\n```";
        let parsed = parse_response(raw, false).unwrap();
        assert_eq!(parsed.text, "fenced");
    }

    #[test]
    fn tolerates_leading_clock_prefix() {
        let raw = "[14:32] {\"response\": \"hi\"}";
        let parsed = parse_response(raw, false).unwrap();
        assert_eq!(parsed.text, "hi");
    }

    #[test]
    fn tolerates_msg_time_framing() {
        let raw = "<msg_time>2026-01-01T00:00:00Z</msg_time>{\"response\": \"hi\"}";
        let parsed = parse_response(raw, false).unwrap();
        assert_eq!(parsed.text, "hi");
    }

    #[test]
    fn rejects_missing_response_field() {
        let err = parse_response(r#"{"status": "active"}"#, false).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn rejects_non_string_response_field() {
        let err = parse_response(r#"{"response": 42}"#, false).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn rejects_truncated_json() {
        let err = parse_response(r#"{"response": "hi""#, false).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn rejects_xml_style_tool_call_attempt() {
        let err = parse_response("<core.say>hello</core.say>", false).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(msg) if msg.contains("XML-style")));
    }

    #[test]
    fn allows_plain_text_when_configured() {
        let parsed = parse_response("just talking, no json", true).unwrap();
        assert_eq!(parsed.text, "just talking, no json");
    }

    #[test]
    fn plain_text_rejected_by_default() {
        let err = parse_response("just talking, no json", false).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }
}
