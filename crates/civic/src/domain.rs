//! Core domain types for civic issue reports.
//!
//! This module defines the reported issue, its three-valued status lifecycle,
//! and the submission payload that is normalized into a storable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::IssueError;

/// Reporter id used when a submission carries none.
pub const DEFAULT_USER_ID: &str = "demo-user-1";
/// Reporter display name used when a submission carries none.
pub const DEFAULT_USER_NAME: &str = "Demo User";
/// Title used when neither a title nor a description is usable.
pub const DEFAULT_TITLE: &str = "Issue";
/// Number of description characters used to derive a missing title.
pub const DERIVED_TITLE_CHARS: usize = 40;

/// Issue lifecycle status
///
/// Variants are ordered: `Pending < SentToAuthority < Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Reported, not yet forwarded
    Pending,
    /// Forwarded to the responsible authority
    #[serde(rename = "Sent to Authority")]
    SentToAuthority,
    /// Closed
    Resolved,
}

impl Status {
    /// Every status, in lifecycle order.
    pub const ALL: [Status; 3] = [Status::Pending, Status::SentToAuthority, Status::Resolved];

    /// Wire representation, as stored and returned by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::SentToAuthority => "Sent to Authority",
            Status::Resolved => "Resolved",
        }
    }

    /// Statuses from which a move to `self` does not go backward.
    pub fn reachable_from(self) -> Vec<Status> {
        Status::ALL.into_iter().filter(|s| *s <= self).collect()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                IssueError::Validation(format!(
                    "unknown status '{}' (expected one of: Pending, Sent to Authority, Resolved)",
                    s
                ))
            })
    }
}

/// How manual status updates are checked against the current status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionPolicy {
    /// Any known status may overwrite any other, including backward moves
    #[default]
    Unrestricted,
    /// A manual update may keep or advance the status, never move it back
    ForwardOnly,
}

impl TransitionPolicy {
    /// Statuses the record must currently hold for an update to `target` to apply.
    ///
    /// `None` means the update applies regardless of the current status.
    pub fn allowed_from(&self, target: Status) -> Option<Vec<Status>> {
        match self {
            TransitionPolicy::Unrestricted => None,
            TransitionPolicy::ForwardOnly => Some(target.reachable_from()),
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unrestricted" => Ok(TransitionPolicy::Unrestricted),
            "forward-only" => Ok(TransitionPolicy::ForwardOnly),
            other => Err(format!(
                "unknown transition policy '{}' (expected 'unrestricted' or 'forward-only')",
                other
            )),
        }
    }
}

/// A citizen-submitted report of a civic problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Store-assigned unique identifier
    pub id: String,
    /// Reporter identifier (unauthenticated)
    pub user_id: String,
    /// Reporter display name
    pub user_name: String,
    pub title: String,
    pub description: String,
    /// Relative path of the uploaded photo, e.g. `uploads/1700000000000-42.jpg`
    pub photo_path: Option<String>,
    /// Free-text location, empty when not given
    pub location: String,
    pub status: Status,
    /// Insertion time, never modified afterwards
    #[serde(rename = "dateCreated", with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

impl Issue {
    /// Build the stored record for a normalized submission.
    pub fn from_new(id: String, new: NewIssue, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            user_name: new.user_name,
            title: new.title,
            description: new.description,
            photo_path: new.photo_path,
            location: new.location,
            status: Status::Pending,
            created_at,
        }
    }
}

/// A creation request with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub user_id: String,
    pub user_name: String,
    pub title: String,
    pub description: String,
    pub photo_path: Option<String>,
    pub location: String,
}

/// Raw creation request as received from a client.
///
/// Empty strings are treated the same as missing fields for the content
/// fields (`title`, `description`, `location`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSubmission {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(skip)]
    pub photo_path: Option<String>,
}

impl IssueSubmission {
    /// Whether the submission carries a usable title or description.
    pub fn has_content(&self) -> bool {
        non_empty(&self.title).is_some() || non_empty(&self.description).is_some()
    }

    /// Reject a submission with neither a title nor a description.
    pub fn validate(&self) -> Result<(), IssueError> {
        if self.has_content() {
            Ok(())
        } else {
            Err(IssueError::Validation(
                "title or description is required".to_string(),
            ))
        }
    }

    /// Apply defaults and derive missing content.
    ///
    /// A missing title is derived from the first 40 characters of the
    /// description; a missing description copies the title.
    ///
    /// # Errors
    ///
    /// Returns [`IssueError::Validation`] when both title and description are absent.
    pub fn normalize(self) -> Result<NewIssue, IssueError> {
        self.validate()?;

        let title = non_empty(&self.title);
        let description = non_empty(&self.description);

        let stored_title = match (title, description) {
            (Some(t), _) => t.to_string(),
            (None, Some(d)) => d.chars().take(DERIVED_TITLE_CHARS).collect(),
            (None, None) => DEFAULT_TITLE.to_string(),
        };
        let stored_description = description.or(title).unwrap_or_default().to_string();

        Ok(NewIssue {
            user_id: self.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            user_name: self
                .user_name
                .unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
            title: stored_title,
            description: stored_description,
            photo_path: self.photo_path,
            location: non_empty(&self.location).unwrap_or_default().to_string(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    /// Only issues reported by this user
    pub user_id: Option<String>,
}

impl IssueFilter {
    /// Filter by reporter; an empty id means no filter.
    pub fn by_user(user_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.filter(|u| !u.is_empty()).map(str::to_string),
        }
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        self.user_id
            .as_deref()
            .map_or(true, |user_id| issue.user_id == user_id)
    }
}

/// ISO-8601 timestamps with millisecond precision and a `Z` suffix.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn submission(title: Option<&str>, description: Option<&str>) -> IssueSubmission {
        IssueSubmission {
            title: title.map(str::to_string),
            description: description.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_applies_reporter_defaults() {
        let new = submission(Some("Broken light"), None).normalize().unwrap();

        assert_eq!(new.user_id, DEFAULT_USER_ID);
        assert_eq!(new.user_name, DEFAULT_USER_NAME);
        assert_eq!(new.location, "");
        assert_eq!(new.photo_path, None);
    }

    #[test]
    fn test_description_only_derives_title_from_first_40_chars() {
        let description = "The streetlight on the corner of Elm and 5th has been out for a week";
        let new = submission(None, Some(description)).normalize().unwrap();

        assert_eq!(new.title, "The streetlight on the corner of Elm and");
        assert_eq!(new.title.chars().count(), 40);
        assert_eq!(new.description, description);
    }

    #[test]
    fn test_short_description_is_used_whole_as_title() {
        let new = submission(None, Some("Pothole")).normalize().unwrap();
        assert_eq!(new.title, "Pothole");
    }

    #[test]
    fn test_title_only_copies_title_into_description() {
        let new = submission(Some("Graffiti"), None).normalize().unwrap();
        assert_eq!(new.title, "Graffiti");
        assert_eq!(new.description, "Graffiti");
    }

    #[test]
    fn test_missing_title_and_description_is_rejected() {
        let err = submission(None, None).normalize().unwrap_err();
        assert!(matches!(err, IssueError::Validation(_)));
        assert!(err.to_string().contains("title or description is required"));
    }

    #[test]
    fn test_empty_strings_count_as_missing() {
        let err = submission(Some(""), Some("")).normalize().unwrap_err();
        assert!(matches!(err, IssueError::Validation(_)));

        let new = submission(Some(""), Some("Flooded underpass")).normalize().unwrap();
        assert_eq!(new.title, "Flooded underpass");
    }

    #[test]
    fn test_derived_title_respects_multibyte_chars() {
        let description = "é".repeat(50);
        let new = submission(None, Some(&description)).normalize().unwrap();
        assert_eq!(new.title, "é".repeat(40));
    }

    #[test]
    fn test_status_wire_strings_round_trip() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_unknown_status_is_validation_error() {
        let err = "Closed".parse::<Status>().unwrap_err();
        assert!(matches!(err, IssueError::Validation(_)));
        assert!("pending".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_order_follows_lifecycle() {
        assert!(Status::Pending < Status::SentToAuthority);
        assert!(Status::SentToAuthority < Status::Resolved);
    }

    #[test]
    fn test_forward_only_policy_allows_same_or_earlier_sources() {
        let policy = TransitionPolicy::ForwardOnly;
        assert_eq!(policy.allowed_from(Status::Pending), Some(vec![Status::Pending]));
        assert_eq!(
            policy.allowed_from(Status::Resolved),
            Some(Status::ALL.to_vec())
        );
        assert_eq!(TransitionPolicy::Unrestricted.allowed_from(Status::Pending), None);
    }

    #[test]
    fn test_transition_policy_parses_cli_names() {
        assert_eq!(
            "forward-only".parse::<TransitionPolicy>().unwrap(),
            TransitionPolicy::ForwardOnly
        );
        assert_eq!(
            "unrestricted".parse::<TransitionPolicy>().unwrap(),
            TransitionPolicy::Unrestricted
        );
        assert!("strict".parse::<TransitionPolicy>().is_err());
    }

    #[test]
    fn test_issue_serializes_with_wire_field_names() {
        let created_at = Utc.with_ymd_and_hms(2026, 10, 15, 8, 30, 0).unwrap();
        let new = submission(Some("Broken light"), Some("Out since Monday"))
            .normalize()
            .unwrap();
        let issue = Issue::from_new("abc".to_string(), new, created_at);

        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["userId"], DEFAULT_USER_ID);
        assert_eq!(value["userName"], DEFAULT_USER_NAME);
        assert_eq!(value["photoPath"], serde_json::Value::Null);
        assert_eq!(value["status"], "Pending");
        assert_eq!(value["dateCreated"], "2026-10-15T08:30:00.000Z");

        let back: Issue = serde_json::from_value(value).unwrap();
        assert_eq!(back, issue);
    }

    #[test]
    fn test_filter_ignores_empty_user_id() {
        assert_eq!(IssueFilter::by_user(Some("")), IssueFilter::default());
        assert_eq!(
            IssueFilter::by_user(Some("u1")).user_id.as_deref(),
            Some("u1")
        );
    }

    proptest! {
        #[test]
        fn prop_derived_title_is_description_prefix(description in "\\PC{1,120}") {
            let new = submission(None, Some(&description)).normalize().unwrap();
            prop_assert!(description.starts_with(&new.title));
            prop_assert_eq!(
                new.title.chars().count(),
                description.chars().count().min(DERIVED_TITLE_CHARS)
            );
        }
    }
}
