use chrono::{Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;

const EXPIRY_MARGIN_SECS: i64 = 30;

pub fn check_expired(expires_at: DateTimeWithTimeZone) -> bool {
    let now_with_margin = Utc::now().fixed_offset() + Duration::seconds(EXPIRY_MARGIN_SECS);
    now_with_margin > expires_at.fixed_offset()
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Truncates on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
