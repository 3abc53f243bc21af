//! Storage abstraction layer for persisting issue reports.
//!
//! This module defines the `IssueStore` trait that abstracts storage operations,
//! allowing different backends (JSON files, MongoDB, in-memory) to be used
//! interchangeably by the service and the status sweep.

use crate::domain::{Issue, IssueFilter, NewIssue, Status};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

pub mod json;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

// Re-export for convenience
pub use json::JsonFileStorage;
pub use memory::InMemoryStorage;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStorage;

/// Outcome of a single-record status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The record matched and now holds the new status
    Updated,
    /// No record has this id
    NotFound,
    /// The record exists but its current status was not in the allowed set
    Rejected { current: Status },
}

/// Trait for storage backends that persist issue reports.
///
/// Implementations are cheap handles: cloning shares the same underlying
/// data or connection. Every mutating method is atomic per record; nothing
/// spans more than one record.
///
/// # Examples
///
/// ```
/// use civic::domain::{IssueFilter, IssueSubmission};
/// use civic::storage::{InMemoryStorage, IssueStore};
///
/// # tokio_test_block(async {
/// let storage = InMemoryStorage::new();
/// storage.init().await.unwrap();
///
/// let new = IssueSubmission {
///     title: Some("Broken light".to_string()),
///     ..Default::default()
/// }
/// .normalize()
/// .unwrap();
/// let issue = storage.insert_issue(new, chrono::Utc::now()).await.unwrap();
///
/// let loaded = storage.load_issue(&issue.id).await.unwrap().unwrap();
/// assert_eq!(loaded.title, "Broken light");
/// assert_eq!(storage.list_issues(&IssueFilter::default()).await.unwrap().len(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[async_trait]
pub trait IssueStore: Clone + Send + Sync + 'static {
    /// Initialize the storage backend (idempotent).
    ///
    /// Creates necessary directories, files, or indexes.
    async fn init(&self) -> Result<()>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;

    /// Insert a new issue with status `Pending`.
    ///
    /// The backend assigns the id. `created_at` is stored with millisecond
    /// precision.
    async fn insert_issue(&self, new: NewIssue, created_at: DateTime<Utc>) -> Result<Issue>;

    /// Load an issue by ID.
    ///
    /// Returns `Ok(None)` when no issue has this id, including ids that are
    /// not well-formed for the backend.
    async fn load_issue(&self, id: &str) -> Result<Option<Issue>>;

    /// List issues matching `filter`, newest first.
    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// Overwrite the status of one issue.
    ///
    /// When `allowed_from` is given, the update only applies if the current
    /// status is one of those values; otherwise the current status is
    /// reported back as [`StatusChange::Rejected`].
    async fn update_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: Option<&[Status]>,
    ) -> Result<StatusChange>;

    /// Move every issue currently in `from` and created at or before `cutoff` to `to`.
    ///
    /// Returns the number of issues changed.
    async fn advance_status(&self, from: Status, to: Status, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Creation timestamps are kept at millisecond precision in every backend.
pub(crate) fn stored_timestamp(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at.trunc_subsecs(3)
}

/// Newest first, the listing order every backend returns.
pub(crate) fn sort_newest_first(issues: &mut [Issue]) {
    issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
