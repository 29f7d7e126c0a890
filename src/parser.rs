//! Normalization of Gmail API payloads into [`Message`] records

use chrono::{DateTime, Utc};
use google_gmail1::api::{Message as GmailMessage, MessagePart};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TriageError};
use crate::models::Message;

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>]+)>").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static HTML_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\f]+").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Parse a full-format Gmail API message into a normalized [`Message`]
pub fn parse_message(msg: GmailMessage) -> Result<Message> {
    let external_id = msg
        .id
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let thread_id = msg.thread_id.unwrap_or_default();
    let snippet = msg.snippet.unwrap_or_default();

    let payload = msg
        .payload
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing payload".to_string()))?;

    let mut from = String::new();
    let mut to = String::new();
    let mut subject = String::new();
    let mut date_str = String::new();
    let mut list_unsubscribe = None;

    for header in payload.headers.iter().flatten() {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            match name.to_lowercase().as_str() {
                "from" => from = value.clone(),
                "to" => to = value.clone(),
                "subject" => subject = value.clone(),
                "date" => date_str = value.clone(),
                "list-unsubscribe" => list_unsubscribe = Some(value.clone()),
                _ => {}
            }
        }
    }

    let received_at = msg
        .internal_date
        .and_then(DateTime::from_timestamp_millis)
        .or_else(|| parse_date(&date_str))
        .unwrap_or_else(Utc::now);

    let mut body = extract_body(&payload);
    if body.trim().is_empty() {
        body = snippet.clone();
    }

    Ok(Message {
        external_id,
        thread_id,
        from,
        to,
        subject,
        body,
        snippet,
        received_at,
        unsubscribe_url: list_unsubscribe.as_deref().and_then(extract_unsubscribe_target),
    })
}

/// Pick the unsubscribe target out of a `List-Unsubscribe` header value.
///
/// The header is a list of bracketed URIs. An HTTP(S) entry wins over a mailto
/// entry regardless of order.
pub fn extract_unsubscribe_target(header: &str) -> Option<String> {
    let entries: Vec<&str> = BRACKETED
        .captures_iter(header)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .collect();

    let web = entries.iter().find(|entry| {
        let lower = entry.to_ascii_lowercase();
        lower.starts_with("https://") || lower.starts_with("http://")
    });
    if let Some(url) = web {
        return Some(url.to_string());
    }

    entries
        .iter()
        .find(|entry| entry.to_ascii_lowercase().starts_with("mailto:"))
        .map(|entry| entry.to_string())
}

/// Plain-text body: a `text/plain` part anywhere in the tree, else the
/// top-level body, else the first HTML part reduced to text.
fn extract_body(payload: &MessagePart) -> String {
    if let Some(text) = find_part(payload, "text/plain") {
        return text;
    }

    if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_ref()) {
        let text = decode_body_data(data);
        return if is_html(payload) { html_to_text(&text) } else { text };
    }

    find_part(payload, "text/html")
        .map(|html| html_to_text(&html))
        .unwrap_or_default()
}

fn find_part(part: &MessagePart, mime_type: &str) -> Option<String> {
    let matches = part
        .mime_type
        .as_deref()
        .map(|m| m.eq_ignore_ascii_case(mime_type))
        .unwrap_or(false);

    if matches {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            return Some(decode_body_data(data));
        }
    }

    part.parts
        .iter()
        .flatten()
        .find_map(|child| find_part(child, mime_type))
}

fn is_html(part: &MessagePart) -> bool {
    part.mime_type
        .as_deref()
        .map(|m| m.eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}

/// Body bytes arrive base64url-decoded from the API; invalid UTF-8 is replaced.
fn decode_body_data(data: &[u8]) -> String {
    String::from_utf8_lossy(data).replace("\r\n", "\n")
}

fn html_to_text(html: &str) -> String {
    let without_blocks = HTML_BLOCK.replace_all(html, " ");
    let with_breaks = without_blocks
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n")
        .replace("</div>", "\n");
    let stripped = HTML_TAG.replace_all(&with_breaks, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let collapsed = WHITESPACE.replace_all(&decoded, " ");
    BLANK_LINES.replace_all(collapsed.trim(), "\n\n").to_string()
}

/// Parse RFC 2822 date string, falling back to RFC 3339
fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    if date_str.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(date_str)
        .or_else(|_| DateTime::parse_from_rfc3339(date_str))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};
    use proptest::prelude::*;

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn leaf(mime_type: &str, data: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            body: Some(MessagePartBody {
                data: Some(data.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn gmail_message(payload: MessagePart) -> GmailMessage {
        GmailMessage {
            id: Some("msg-1".to_string()),
            thread_id: Some("thread-1".to_string()),
            snippet: Some("snippet text".to_string()),
            internal_date: Some(1_704_124_800_000),
            payload: Some(payload),
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_plain_text_part_in_multipart() {
        let mut payload = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            headers: Some(vec![
                header("From", "Shop <news@shop.test>"),
                header("To", "me@example.com"),
                header("Subject", "Big sale"),
            ]),
            ..Default::default()
        };
        payload.parts = Some(vec![
            leaf("text/html", "<p>HTML body</p>"),
            leaf("text/plain", "Plain body"),
        ]);

        let message = parse_message(gmail_message(payload)).unwrap();
        assert_eq!(message.external_id, "msg-1");
        assert_eq!(message.thread_id, "thread-1");
        assert_eq!(message.from, "Shop <news@shop.test>");
        assert_eq!(message.subject, "Big sale");
        assert_eq!(message.body, "Plain body");
        assert_eq!(message.received_at.timestamp_millis(), 1_704_124_800_000);
    }

    #[test]
    fn test_finds_plain_text_in_nested_multipart() {
        let mut alternative = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            ..Default::default()
        };
        alternative.parts = Some(vec![leaf("text/plain", "Nested plain")]);

        let mut mixed = MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            ..Default::default()
        };
        mixed.parts = Some(vec![alternative, leaf("application/pdf", "%PDF")]);

        let message = parse_message(gmail_message(mixed)).unwrap();
        assert_eq!(message.body, "Nested plain");
    }

    #[test]
    fn test_single_part_body() {
        let payload = leaf("text/plain", "Hello\r\nthere");
        let message = parse_message(gmail_message(payload)).unwrap();
        assert_eq!(message.body, "Hello\nthere");
    }

    #[test]
    fn test_html_only_is_reduced_to_text() {
        let mut payload = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            ..Default::default()
        };
        payload.parts = Some(vec![leaf(
            "text/html",
            "<html><head><style>p{}</style></head><body><p>Hi &amp; welcome</p></body></html>",
        )]);

        let message = parse_message(gmail_message(payload)).unwrap();
        assert_eq!(message.body, "Hi & welcome");
    }

    #[test]
    fn test_empty_body_falls_back_to_snippet() {
        let payload = MessagePart {
            mime_type: Some("text/plain".to_string()),
            ..Default::default()
        };
        let message = parse_message(gmail_message(payload)).unwrap();
        assert_eq!(message.body, "snippet text");
    }

    #[test]
    fn test_missing_id_is_invalid() {
        let mut msg = gmail_message(leaf("text/plain", "x"));
        msg.id = None;
        assert!(matches!(
            parse_message(msg),
            Err(TriageError::InvalidMessageFormat(_))
        ));
    }

    #[test]
    fn test_date_header_used_without_internal_date() {
        let mut payload = leaf("text/plain", "x");
        payload.headers = Some(vec![header("Date", "Mon, 24 Nov 2025 10:30:00 +0000")]);
        let mut msg = gmail_message(payload);
        msg.internal_date = None;

        let message = parse_message(msg).unwrap();
        assert_eq!(message.received_at.to_rfc3339(), "2025-11-24T10:30:00+00:00");
    }

    #[test]
    fn test_unsubscribe_header_attached() {
        let mut payload = leaf("text/plain", "x");
        payload.headers = Some(vec![header(
            "List-Unsubscribe",
            "<mailto:leave@list.test>, <https://list.test/u?id=1>",
        )]);
        let message = parse_message(gmail_message(payload)).unwrap();
        assert_eq!(
            message.unsubscribe_url.as_deref(),
            Some("https://list.test/u?id=1")
        );
    }

    #[test]
    fn test_extract_unsubscribe_prefers_web() {
        assert_eq!(
            extract_unsubscribe_target("<mailto:a@b.test>, <https://x.test/unsub>"),
            Some("https://x.test/unsub".to_string())
        );
    }

    #[test]
    fn test_extract_unsubscribe_falls_back_to_mailto() {
        assert_eq!(
            extract_unsubscribe_target("<mailto:a@b.test?subject=unsubscribe>"),
            Some("mailto:a@b.test?subject=unsubscribe".to_string())
        );
    }

    #[test]
    fn test_extract_unsubscribe_absent() {
        assert_eq!(extract_unsubscribe_target(""), None);
        assert_eq!(extract_unsubscribe_target("https://not-bracketed.test"), None);
        assert_eq!(extract_unsubscribe_target("<ftp://x.test>"), None);
    }

    proptest! {
        #[test]
        fn prop_web_target_wins_regardless_of_order(
            host in "[a-z]{1,12}",
            user in "[a-z]{1,8}",
            web_first in any::<bool>(),
        ) {
            let web = format!("<https://{}.test/unsub>", host);
            let mail = format!("<mailto:{}@{}.test>", user, host);
            let header = if web_first {
                format!("{}, {}", web, mail)
            } else {
                format!("{}, {}", mail, web)
            };
            let expected = format!("https://{}.test/unsub", host);
            prop_assert_eq!(extract_unsubscribe_target(&header), Some(expected));
        }
    }
}
