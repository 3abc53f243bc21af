//! In-memory storage implementation.
//!
//! This backend stores all issues in a `HashMap`, used by tests and by the
//! server's `memory` storage mode. Each instance is isolated; clones share data.

use crate::domain::{Issue, IssueFilter, NewIssue, Status};
use crate::storage::{sort_newest_first, stored_timestamp, IssueStore, StatusChange};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// In-memory storage backend.
///
/// All data is lost when the last clone is dropped.
/// Uses `Arc<RwLock<>>` for shared interior mutability - clones share the same data.
///
/// # Examples
///
/// ```
/// use civic::storage::{InMemoryStorage, IssueStore};
///
/// let storage = InMemoryStorage::new();
/// let shared = storage.clone();
/// assert!(shared.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    issues: Arc<RwLock<HashMap<String, Issue>>>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored issues.
    pub fn len(&self) -> usize {
        self.issues.read().map(|issues| issues.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Issue>>> {
        self.issues
            .read()
            .map_err(|_| anyhow!("In-memory issue store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Issue>>> {
        self.issues
            .write()
            .map_err(|_| anyhow!("In-memory issue store lock poisoned"))
    }
}

#[async_trait]
impl IssueStore for InMemoryStorage {
    async fn init(&self) -> Result<()> {
        // No initialization needed for in-memory storage
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn insert_issue(&self, new: NewIssue, created_at: DateTime<Utc>) -> Result<Issue> {
        let issue = Issue::from_new(
            Uuid::new_v4().to_string(),
            new,
            stored_timestamp(created_at),
        );
        self.write()?.insert(issue.id.clone(), issue.clone());
        Ok(issue)
    }

    async fn load_issue(&self, id: &str) -> Result<Option<Issue>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let mut issues: Vec<Issue> = self
            .read()?
            .values()
            .filter(|issue| filter.matches(issue))
            .cloned()
            .collect();
        sort_newest_first(&mut issues);
        Ok(issues)
    }

    async fn update_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: Option<&[Status]>,
    ) -> Result<StatusChange> {
        let mut issues = self.write()?;
        let Some(issue) = issues.get_mut(id) else {
            return Ok(StatusChange::NotFound);
        };

        if let Some(allowed) = allowed_from {
            if !allowed.contains(&issue.status) {
                return Ok(StatusChange::Rejected {
                    current: issue.status,
                });
            }
        }

        issue.status = status;
        Ok(StatusChange::Updated)
    }

    async fn advance_status(&self, from: Status, to: Status, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut moved = 0;
        for issue in self.write()?.values_mut() {
            if issue.status == from && issue.created_at <= cutoff {
                issue.status = to;
                moved += 1;
            }
        }
        Ok(moved)
    }
}
