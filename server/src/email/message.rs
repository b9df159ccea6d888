//! Provider-independent message model.
//!
//! Every provider normalizes into [`CanonicalMessage`]. A message is a read-only
//! snapshot: callers re-fetch instead of mutating it.

use google_gmail1::api::{Message, MessagePart};
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::truncate_chars;

/// Cross-provider marker for unread messages.
pub const UNREAD_LABEL: &str = "UNREAD";
pub const INBOX_LABEL: &str = "INBOX";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MessageHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl MessageHeaders {
    /// Builds the header map from raw (name, value) pairs. The first occurrence wins.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = MessageHeaders::default();
        for (name, value) in pairs {
            let slot = match name.to_ascii_lowercase().as_str() {
                "subject" => &mut headers.subject,
                "from" => &mut headers.from,
                "to" => &mut headers.to,
                "cc" => &mut headers.cc,
                "bcc" => &mut headers.bcc,
                "date" => &mut headers.date,
                "message-id" => &mut headers.message_id,
                "reply-to" => &mut headers.reply_to,
                "in-reply-to" => &mut headers.in_reply_to,
                "references" => &mut headers.references,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        headers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub attachment_id: String,
    pub headers: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMessage {
    pub id: String,
    pub thread_id: String,
    pub history_id: String,
    pub headers: MessageHeaders,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_plain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_html: Option<String>,
    pub label_ids: IndexSet<String>,
    pub attachments: Vec<Attachment>,
    pub inline: Vec<Attachment>,
}

impl CanonicalMessage {
    pub fn is_unread(&self) -> bool {
        self.label_ids.contains(UNREAD_LABEL)
    }

    pub fn subject(&self) -> &str {
        self.headers.subject.as_deref().unwrap_or("")
    }

    pub fn from(&self) -> &str {
        self.headers.from.as_deref().unwrap_or("")
    }

    /// Plain text body, falling back to the HTML body rendered as text, then the snippet.
    pub fn body_text(&self) -> String {
        if let Some(text) = self.text_plain.as_ref().filter(|t| !t.trim().is_empty()) {
            return text.clone();
        }
        if let Some(html) = &self.text_html {
            return html2text::from_read(html.as_bytes(), 100);
        }
        self.snippet.clone()
    }

    /// Compact rendering used as model context.
    pub fn prompt_content(&self, max_body_chars: usize) -> String {
        let body = self.body_text();
        format!(
            "<from>{}</from>\n<to>{}</to>\n<subject>{}</subject>\n<date>{}</date>\n<body>{}</body>",
            self.from(),
            self.headers.to.as_deref().unwrap_or(""),
            self.subject(),
            self.headers.date.as_deref().unwrap_or(""),
            truncate_chars(body.trim(), max_body_chars),
        )
    }

    pub fn from_gmail_message(msg: &Message) -> Self {
        let headers = msg
            .payload
            .as_ref()
            .and_then(|p| p.headers.as_ref())
            .map(|headers| {
                MessageHeaders::from_pairs(headers.iter().filter_map(|h| {
                    Some((h.name.as_deref()?, h.value.as_deref()?))
                }))
            })
            .unwrap_or_default();

        let (text_plain, text_html) = msg
            .payload
            .as_ref()
            .map(extract_body_from_payload)
            .unwrap_or((None, None));

        let mut attachments = vec![];
        let mut inline = vec![];
        if let Some(payload) = &msg.payload {
            collect_attachments(payload, &mut attachments, &mut inline);
        }

        CanonicalMessage {
            id: msg.id.clone().unwrap_or_default(),
            thread_id: msg.thread_id.clone().unwrap_or_default(),
            history_id: msg.history_id.map(|h| h.to_string()).unwrap_or_default(),
            headers,
            snippet: decode_snippet(msg.snippet.as_deref().unwrap_or("")),
            text_plain,
            text_html,
            label_ids: msg.label_ids.clone().unwrap_or_default().into_iter().collect(),
            attachments,
            inline,
        }
    }
}

fn part_header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .as_ref()?
        .iter()
        .find(|h| {
            h.name
                .as_deref()
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|h| h.value.as_deref())
}

fn body_string(part: &MessagePart) -> Option<String> {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_ref())
        .and_then(|d| String::from_utf8(d.clone()).ok())
}

/// Extract body text from a Gmail message part recursively
fn extract_body_from_payload(part: &MessagePart) -> (Option<String>, Option<String>) {
    let mime_type = part.mime_type.as_deref().unwrap_or("");
    let is_attachment = part.filename.as_deref().is_some_and(|f| !f.is_empty());

    match mime_type {
        "text/plain" if !is_attachment => (body_string(part), None),
        "text/html" if !is_attachment => (None, body_string(part)),
        _ => {
            let mut text = None;
            let mut html = None;
            for sub_part in part.parts.iter().flatten() {
                let (t, h) = extract_body_from_payload(sub_part);
                if t.is_some() && text.is_none() {
                    text = t;
                }
                if h.is_some() && html.is_none() {
                    html = h;
                }
            }
            (text, html)
        }
    }
}

fn collect_attachments(part: &MessagePart, attachments: &mut Vec<Attachment>, inline: &mut Vec<Attachment>) {
    let filename = part.filename.as_deref().unwrap_or("");
    let attachment_id = part.body.as_ref().and_then(|b| b.attachment_id.clone());

    if let (false, Some(attachment_id)) = (filename.is_empty(), attachment_id) {
        let mut headers = IndexMap::new();
        for name in ["content-type", "content-description", "content-id"] {
            if let Some(value) = part_header(part, name) {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        let is_inline = part_header(part, "content-disposition")
            .is_some_and(|d| d.trim_start().to_ascii_lowercase().starts_with("inline"));

        let attachment = Attachment {
            filename: filename.to_string(),
            mime_type: part.mime_type.clone().unwrap_or_default(),
            size: part.body.as_ref().and_then(|b| b.size).unwrap_or(0).max(0) as u64,
            attachment_id,
            headers,
        };
        if is_inline {
            inline.push(attachment);
        } else {
            attachments.push(attachment);
        }
    }

    for sub_part in part.parts.iter().flatten() {
        collect_attachments(sub_part, attachments, inline);
    }
}

/// Decodes the HTML entities providers leave in message previews.
pub fn decode_snippet(snippet: &str) -> String {
    static RE_NUMERIC_ENTITY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").unwrap());

    let decoded = RE_NUMERIC_ENTITY.replace_all(snippet, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    decoded
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn text_part(mime: &str, data: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessagePartBody {
                data: Some(data.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_snippet() {
        assert_eq!(decode_snippet("It&#39;s &amp; done"), "It's & done");
        assert_eq!(decode_snippet("&lt;hi&gt; &quot;x&quot; &#x27;"), "<hi> \"x\" '");
        assert_eq!(decode_snippet("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_headers_only_present_when_in_source() {
        let headers = MessageHeaders::from_pairs([
            ("Subject", "Hello"),
            ("FROM", "a@example.com"),
            ("X-Custom", "ignored"),
        ]);
        let json = serde_json::to_value(&headers).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["from".to_string(), "subject".to_string()]);
    }

    #[test]
    fn test_header_keys_are_kebab_case() {
        let headers = MessageHeaders::from_pairs([("Message-ID", "<1@x>"), ("In-Reply-To", "<0@x>")]);
        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(json["message-id"], "<1@x>");
        assert_eq!(json["in-reply-to"], "<0@x>");
    }

    #[test]
    fn test_from_gmail_message() {
        let attachment = MessagePart {
            mime_type: Some("application/pdf".to_string()),
            filename: Some("invoice.pdf".to_string()),
            headers: Some(vec![
                header("Content-Type", "application/pdf; name=\"invoice.pdf\""),
                header("Content-Disposition", "attachment; filename=\"invoice.pdf\""),
            ]),
            body: Some(MessagePartBody {
                attachment_id: Some("att-1".to_string()),
                size: Some(2048),
                ..Default::default()
            }),
            ..Default::default()
        };
        let logo = MessagePart {
            mime_type: Some("image/png".to_string()),
            filename: Some("logo.png".to_string()),
            headers: Some(vec![header("Content-Disposition", "inline; filename=logo.png")]),
            body: Some(MessagePartBody {
                attachment_id: Some("att-2".to_string()),
                size: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let msg = Message {
            id: Some("m1".to_string()),
            thread_id: Some("t1".to_string()),
            history_id: Some(42),
            snippet: Some("Your invoice &amp; receipt".to_string()),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            payload: Some(MessagePart {
                mime_type: Some("multipart/mixed".to_string()),
                headers: Some(vec![
                    header("Subject", "Invoice"),
                    header("From", "Billing <billing@example.com>"),
                ]),
                parts: Some(vec![
                    MessagePart {
                        mime_type: Some("multipart/alternative".to_string()),
                        parts: Some(vec![
                            text_part("text/plain", "Plain body"),
                            text_part("text/html", "<p>Html body</p>"),
                        ]),
                        ..Default::default()
                    },
                    attachment,
                    logo,
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let canonical = CanonicalMessage::from_gmail_message(&msg);
        assert_eq!(canonical.id, "m1");
        assert_eq!(canonical.history_id, "42");
        assert_eq!(canonical.subject(), "Invoice");
        assert_eq!(canonical.snippet, "Your invoice & receipt");
        assert_eq!(canonical.text_plain.as_deref(), Some("Plain body"));
        assert_eq!(canonical.text_html.as_deref(), Some("<p>Html body</p>"));
        assert!(canonical.is_unread());
        assert_eq!(canonical.attachments.len(), 1);
        assert_eq!(canonical.attachments[0].size, 2048);
        assert_eq!(
            canonical.attachments[0].headers.get("content-type").map(String::as_str),
            Some("application/pdf; name=\"invoice.pdf\"")
        );
        assert_eq!(canonical.inline.len(), 1);
        assert_eq!(canonical.inline[0].attachment_id, "att-2");
    }

    #[test]
    fn test_body_text_falls_back_to_html() {
        let msg = CanonicalMessage {
            text_html: Some("<p>Hello there</p>".to_string()),
            ..Default::default()
        };
        assert!(msg.body_text().contains("Hello there"));
    }
}
