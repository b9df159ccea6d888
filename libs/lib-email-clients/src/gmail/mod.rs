pub mod api_quota;
pub mod label_colors;

pub const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";

/// System label ids shared by every Gmail mailbox.
pub mod system_labels {
    pub const INBOX: &str = "INBOX";
    pub const UNREAD: &str = "UNREAD";
    pub const SPAM: &str = "SPAM";
    pub const SENT: &str = "SENT";
    pub const DRAFT: &str = "DRAFT";
}
