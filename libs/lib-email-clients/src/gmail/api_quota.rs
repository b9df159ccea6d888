//! Gmail per-user quota units.
//!
//! See <https://developers.google.com/gmail/api/reference/quota>.

/// Units a single user may spend per second.
pub const GMAIL_QUOTA_PER_SECOND: usize = 250;

pub struct GmailApiQuota {
    pub drafts_create: usize,
    pub get_profile: usize,
    pub labels_create: usize,
    pub labels_get: usize,
    pub labels_list: usize,
    pub messages_get: usize,
    pub messages_list: usize,
    pub messages_modify: usize,
    pub messages_send: usize,
    pub stop: usize,
    pub threads_get: usize,
    pub threads_list: usize,
    pub watch: usize,
}

pub const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    drafts_create: 10,
    get_profile: 1,
    labels_create: 5,
    labels_get: 1,
    labels_list: 1,
    messages_get: 5,
    messages_list: 5,
    messages_modify: 5,
    messages_send: 100,
    stop: 50,
    threads_get: 10,
    threads_list: 10,
    watch: 100,
};
