//! Microsoft Graph constants for Outlook mailboxes.

pub const GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/me";
pub const GRAPH_SUBSCRIPTIONS_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/subscriptions";

/// Graph caps mail subscriptions at just under three days.
pub const MAX_SUBSCRIPTION_MINUTES: i64 = 4230;

/// Well-known folder names accepted in place of folder ids.
pub mod well_known_folders {
    pub const INBOX: &str = "inbox";
    pub const ARCHIVE: &str = "archive";
    pub const JUNK: &str = "junkemail";
    pub const DRAFTS: &str = "drafts";
}

/// Preset colors Graph accepts for master categories.
pub const CATEGORY_COLORS: [&str; 25] = [
    "preset0", "preset1", "preset2", "preset3", "preset4", "preset5", "preset6", "preset7",
    "preset8", "preset9", "preset10", "preset11", "preset12", "preset13", "preset14", "preset15",
    "preset16", "preset17", "preset18", "preset19", "preset20", "preset21", "preset22",
    "preset23", "preset24",
];

/// Picks a stable preset color for a category name.
pub fn category_color(name: &str) -> &'static str {
    let sum = name
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    CATEGORY_COLORS[sum % CATEGORY_COLORS.len()]
}
