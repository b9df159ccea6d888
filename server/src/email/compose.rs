//! MIME construction for replies and forwards.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use indoc::formatdoc;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    Message,
};

use crate::util::html_escape;

use super::{
    message::CanonicalMessage,
    provider::{OutgoingEmail, ProviderError, ProviderResult},
};

/// Threading headers for a reply.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplyContext {
    /// The Message-ID header of the original message
    pub in_reply_to: Option<String>,
    /// The References header chain (includes original Message-ID)
    pub references: Option<String>,
    pub thread_id: Option<String>,
}

pub fn extract_reply_context(original: &CanonicalMessage) -> ReplyContext {
    let message_id = original.headers.message_id.clone();
    let references = match (&original.headers.references, &message_id) {
        (Some(refs), Some(mid)) => Some(format!("{} {}", refs, mid)),
        (None, Some(mid)) => Some(mid.clone()),
        (Some(refs), None) => Some(refs.clone()),
        (None, None) => None,
    };

    ReplyContext {
        in_reply_to: message_id,
        references,
        thread_id: Some(original.thread_id.clone()).filter(|t| !t.is_empty()),
    }
}

pub fn reply_subject(original_subject: &str) -> String {
    if original_subject.to_lowercase().starts_with("re:") {
        original_subject.to_string()
    } else {
        format!("Re: {}", original_subject)
    }
}

pub fn forward_subject(original_subject: &str) -> String {
    if original_subject.to_lowercase().starts_with("fwd:") {
        original_subject.to_string()
    } else {
        format!("Fwd: {}", original_subject)
    }
}

pub fn format_forward_body_text(user_body: &str, original: &CanonicalMessage) -> String {
    format!(
        "{}\n\n---------- Forwarded message ---------\nFrom: {}\nDate: {}\nSubject: {}\nTo: {}\n\n{}",
        user_body,
        original.from(),
        original.headers.date.as_deref().unwrap_or(""),
        original.subject(),
        original.headers.to.as_deref().unwrap_or(""),
        original.text_plain.as_deref().unwrap_or(&original.snippet),
    )
}

pub fn format_forward_body_html(user_body: &str, original: &CanonicalMessage) -> String {
    let original_body = original
        .text_html
        .clone()
        .or_else(|| original.text_plain.as_deref().map(html_escape))
        .unwrap_or_default();

    formatdoc! {r#"
        {user_body}<br><br>
        <div style="border-left: 1px solid #ccc; padding-left: 12px; margin-left: 0;">
            <p>
                <b>---------- Forwarded message ---------</b><br>
                <b>From:</b> {from}<br>
                <b>Date:</b> {date}<br>
                <b>Subject:</b> {subject}<br>
                <b>To:</b> {to}
            </p>
            {original_body}
        </div>"#,
        user_body = html_escape(user_body),
        from = html_escape(original.from()),
        date = html_escape(original.headers.date.as_deref().unwrap_or("")),
        subject = html_escape(original.subject()),
        to = html_escape(original.headers.to.as_deref().unwrap_or("")),
        original_body = original_body,
    }
}

/// Splits a comma separated address header into mailboxes.
pub fn parse_mailboxes(field: &str, value: &str) -> ProviderResult<Vec<Mailbox>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|addr| {
            addr.parse::<Mailbox>().map_err(|e| {
                ProviderError::Other(format!("Invalid '{}' address '{}': {}", field, addr, e))
            })
        })
        .collect()
}

fn add_recipients(
    mut builder: lettre::message::MessageBuilder,
    email: &OutgoingEmail,
) -> ProviderResult<lettre::message::MessageBuilder> {
    for recipient in &email.to {
        for mailbox in parse_mailboxes("to", recipient)? {
            builder = builder.to(mailbox);
        }
    }
    for recipient in &email.cc {
        for mailbox in parse_mailboxes("cc", recipient)? {
            builder = builder.cc(mailbox);
        }
    }
    for recipient in &email.bcc {
        for mailbox in parse_mailboxes("bcc", recipient)? {
            builder = builder.bcc(mailbox);
        }
    }
    Ok(builder)
}

fn from_mailbox(from_email: &str) -> ProviderResult<Mailbox> {
    from_email.parse().map_err(|e| {
        ProviderError::Other(format!("Invalid 'from' address '{}': {}", from_email, e))
    })
}

/// Recipients for a reply: explicit ones, else Reply-To, else the sender.
pub fn reply_recipients(original: &CanonicalMessage, reply: &OutgoingEmail) -> Vec<String> {
    if !reply.to.is_empty() {
        return reply.to.clone();
    }
    original
        .headers
        .reply_to
        .clone()
        .or_else(|| original.headers.from.clone())
        .into_iter()
        .collect()
}

pub fn build_reply(
    from_email: &str,
    original: &CanonicalMessage,
    reply: &OutgoingEmail,
) -> ProviderResult<(Message, ReplyContext)> {
    let context = extract_reply_context(original);
    let subject = reply
        .subject
        .clone()
        .unwrap_or_else(|| reply_subject(original.subject()));

    let mut builder = Message::builder()
        .from(from_mailbox(from_email)?)
        .subject(subject);
    if let Some(ref in_reply_to) = context.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
    }
    if let Some(ref references) = context.references {
        builder = builder.references(references.clone());
    }

    let email = OutgoingEmail {
        to: reply_recipients(original, reply),
        ..reply.clone()
    };
    let message = add_recipients(builder, &email)?
        .header(ContentType::TEXT_PLAIN)
        .body(reply.content.clone())
        .map_err(|e| ProviderError::Other(format!("Failed to build reply: {}", e)))?;

    Ok((message, context))
}

pub fn build_forward(
    from_email: &str,
    original: &CanonicalMessage,
    forward: &OutgoingEmail,
) -> ProviderResult<Message> {
    if forward.to.is_empty() {
        return Err(ProviderError::Other("Forward requires a recipient".to_string()));
    }
    let subject = forward
        .subject
        .clone()
        .unwrap_or_else(|| forward_subject(original.subject()));

    let builder = Message::builder()
        .from(from_mailbox(from_email)?)
        .subject(subject);

    add_recipients(builder, forward)?
        .multipart(MultiPart::alternative_plain_html(
            format_forward_body_text(&forward.content, original),
            format_forward_body_html(&forward.content, original),
        ))
        .map_err(|e| ProviderError::Other(format!("Failed to build forward: {}", e)))
}

/// base64url-encoded RFC 2822 message, as the Gmail API expects.
pub fn encode_raw(message: &Message) -> String {
    URL_SAFE_NO_PAD.encode(message.formatted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::message::MessageHeaders;

    fn original() -> CanonicalMessage {
        CanonicalMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            headers: MessageHeaders {
                subject: Some("Quarterly report".to_string()),
                from: Some("Alice <alice@example.com>".to_string()),
                to: Some("me@example.com".to_string()),
                date: Some("Mon, 1 Jan 2024 10:00:00 +0000".to_string()),
                message_id: Some("<orig@example.com>".to_string()),
                references: Some("<first@example.com>".to_string()),
                ..Default::default()
            },
            text_plain: Some("Numbers attached.".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_reply_context_chains_references() {
        let context = extract_reply_context(&original());
        assert_eq!(context.in_reply_to.as_deref(), Some("<orig@example.com>"));
        assert_eq!(
            context.references.as_deref(),
            Some("<first@example.com> <orig@example.com>")
        );
        assert_eq!(context.thread_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_subject_prefixes_are_not_doubled() {
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "RE: Hello");
        assert_eq!(forward_subject("Hello"), "Fwd: Hello");
        assert_eq!(forward_subject("fwd: Hello"), "fwd: Hello");
    }

    #[test]
    fn test_reply_goes_to_sender_by_default() {
        let reply = OutgoingEmail {
            content: "Thanks!".to_string(),
            ..Default::default()
        };
        assert_eq!(
            reply_recipients(&original(), &reply),
            vec!["Alice <alice@example.com>".to_string()]
        );
    }

    #[test]
    fn test_build_reply_sets_threading_headers() {
        let reply = OutgoingEmail {
            content: "Thanks, looks good.".to_string(),
            ..Default::default()
        };
        let (message, _) = build_reply("me@example.com", &original(), &reply).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("In-Reply-To: <orig@example.com>"));
        assert!(formatted.contains("Subject: Re: Quarterly report"));
        assert!(formatted.contains("alice@example.com"));
    }

    #[test]
    fn test_forward_requires_recipient() {
        let result = build_forward("me@example.com", &original(), &OutgoingEmail::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_forward_body_text() {
        let body = format_forward_body_text("FYI", &original());
        assert!(body.starts_with("FYI\n\n---------- Forwarded message ---------"));
        assert!(body.contains("Subject: Quarterly report"));
        assert!(body.ends_with("Numbers attached."));
    }

    #[test]
    fn test_parse_mailboxes_rejects_garbage() {
        assert_eq!(parse_mailboxes("to", "a@x.com, b@y.com").unwrap().len(), 2);
        assert!(parse_mailboxes("to", "not an address").is_err());
    }
}
