//! The small search grammar shared by every provider.
//!
//! Clauses are whitespace separated and AND-ed together: `is:unread`,
//! `after:<unix-seconds>`, `in:inbox`. Anything else is free text.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use derive_more::derive::Display;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub unread: bool,
    pub after: Option<i64>,
    pub in_inbox: bool,
    pub text: Vec<String>,
}

#[derive(Debug, Display, PartialEq, Eq)]
#[display("invalid search clause '{_0}'")]
pub struct QueryParseError(String);

impl std::error::Error for QueryParseError {}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unread(mut self) -> Self {
        self.unread = true;
        self
    }

    pub fn after(mut self, unix_seconds: i64) -> Self {
        self.after = Some(unix_seconds);
        self
    }

    pub fn in_inbox(mut self) -> Self {
        self.in_inbox = true;
        self
    }

    pub fn after_datetime(&self) -> Option<DateTime<Utc>> {
        self.after.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Gmail's `q` parameter understands the grammar natively.
    pub fn to_gmail_q(&self) -> String {
        self.to_string()
    }

    /// Graph `$filter` expression, if any clause maps to one.
    pub fn to_graph_filter(&self) -> Option<String> {
        let mut clauses = vec![];
        if self.unread {
            clauses.push("isRead eq false".to_string());
        }
        if let Some(after) = self.after_datetime() {
            clauses.push(format!(
                "receivedDateTime ge {}",
                after.format("%Y-%m-%dT%H:%M:%SZ")
            ));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" and "))
        }
    }

    /// Graph `$search` value for free text.
    pub fn to_graph_search(&self) -> Option<String> {
        if self.text.is_empty() {
            None
        } else {
            Some(format!("\"{}\"", self.text.join(" ").replace('"', "")))
        }
    }
}

impl FromStr for SearchQuery {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut query = SearchQuery::default();
        for clause in s.split_whitespace() {
            match clause.split_once(':') {
                Some((key, value)) if key.eq_ignore_ascii_case("is") && value.eq_ignore_ascii_case("unread") => {
                    query.unread = true
                }
                Some((key, value)) if key.eq_ignore_ascii_case("in") && value.eq_ignore_ascii_case("inbox") => {
                    query.in_inbox = true
                }
                Some((key, value)) if key.eq_ignore_ascii_case("after") => {
                    let secs = value
                        .parse::<i64>()
                        .map_err(|_| QueryParseError(clause.to_string()))?;
                    query.after = Some(secs);
                }
                _ => query.text.push(clause.to_string()),
            }
        }
        Ok(query)
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = vec![];
        if self.unread {
            clauses.push("is:unread".to_string());
        }
        if self.in_inbox {
            clauses.push("in:inbox".to_string());
        }
        if let Some(after) = self.after {
            clauses.push(format!("after:{after}"));
        }
        clauses.extend(self.text.iter().cloned());
        write!(f, "{}", clauses.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clauses() {
        let query: SearchQuery = "is:unread after:1700000000 in:inbox invoice".parse().unwrap();
        assert!(query.unread);
        assert!(query.in_inbox);
        assert_eq!(query.after, Some(1_700_000_000));
        assert_eq!(query.text, vec!["invoice".to_string()]);
    }

    #[test]
    fn test_invalid_after_is_rejected() {
        let err = "after:yesterday".parse::<SearchQuery>().unwrap_err();
        assert_eq!(err, QueryParseError("after:yesterday".to_string()));
    }

    #[test]
    fn test_display_matches_builder() {
        let query = SearchQuery::new().unread().after(1_700_000_000);
        assert_eq!(query.to_gmail_q(), "is:unread after:1700000000");
    }

    #[test]
    fn test_graph_filter() {
        let query = SearchQuery::new().unread().after(0);
        assert_eq!(
            query.to_graph_filter().as_deref(),
            Some("isRead eq false and receivedDateTime ge 1970-01-01T00:00:00Z")
        );
        assert_eq!(SearchQuery::new().in_inbox().to_graph_filter(), None);
    }
}
