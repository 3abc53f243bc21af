//! Issue operations on top of a storage backend.
//!
//! `IssueService` is the handle the entry point builds once at startup and
//! shares with every request handler. It owns the store handle, the manual
//! transition policy and, optionally, the notification queue.

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::{Issue, IssueFilter, IssueSubmission, Status, TransitionPolicy};
use crate::errors::{IssueError, IssueResult};
use crate::notify::{IssueReported, NotificationQueue};
use crate::storage::{IssueStore, StatusChange};

/// Issue operations over storage backend `S`.
pub struct IssueService<S: IssueStore> {
    storage: S,
    policy: TransitionPolicy,
    notifications: Option<NotificationQueue>,
}

impl<S: IssueStore> IssueService<S> {
    /// Create a service with the unrestricted policy and no notifications.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            policy: TransitionPolicy::default(),
            notifications: None,
        }
    }

    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notifications(mut self, queue: NotificationQueue) -> Self {
        self.notifications = Some(queue);
        self
    }

    /// Get reference to the storage backend
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Check that the backing store answers.
    pub async fn health(&self) -> IssueResult<()> {
        self.storage.ping().await.map_err(IssueError::Storage)
    }

    /// Validate and store a raw submission with status Pending and the current time.
    ///
    /// The notification carries the title and description as submitted and
    /// is queued after the insert succeeds; its outcome never affects the result.
    pub async fn create_issue(&self, submission: IssueSubmission) -> IssueResult<Issue> {
        let submitted_title = submission.title.clone().unwrap_or_default();
        let submitted_description = submission.description.clone().unwrap_or_default();

        let new = submission.normalize()?;
        let issue = self.storage.insert_issue(new, Utc::now()).await?;
        info!(issue_id = %issue.id, user_id = %issue.user_id, "Issue reported");

        if let Some(queue) = &self.notifications {
            queue.emit(IssueReported::new(
                &issue,
                submitted_title,
                submitted_description,
            ));
        }

        Ok(issue)
    }

    /// List issues, newest first, optionally only those of one reporter.
    pub async fn list_issues(&self, user_id: Option<&str>) -> IssueResult<Vec<Issue>> {
        let filter = IssueFilter::by_user(user_id);
        Ok(self.storage.list_issues(&filter).await?)
    }

    /// Get a single issue by id.
    pub async fn get_issue(&self, id: &str) -> IssueResult<Issue> {
        self.storage
            .load_issue(id)
            .await?
            .ok_or_else(|| IssueError::not_found(id))
    }

    /// Manually set the status of an issue.
    ///
    /// # Errors
    ///
    /// - `Validation` when `status` is missing, empty, or not a known status
    /// - `NotFound` when no issue has this id
    /// - `InvalidTransition` when the transition policy forbids the move
    pub async fn update_status(&self, id: &str, status: Option<&str>) -> IssueResult<Status> {
        let raw = status
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IssueError::Validation("status required".to_string()))?;
        let status: Status = raw.parse()?;

        let allowed_from = self.policy.allowed_from(status);
        match self
            .storage
            .update_status(id, status, allowed_from.as_deref())
            .await?
        {
            StatusChange::Updated => {
                debug!(issue_id = %id, status = %status, "Status updated");
                Ok(status)
            }
            StatusChange::NotFound => Err(IssueError::not_found(id)),
            StatusChange::Rejected { current } => Err(IssueError::InvalidTransition {
                from: current,
                to: status,
            }),
        }
    }
}
