//! JSON file-based storage implementation.
//!
//! All data is stored as JSON files in a `data/` directory with atomic writes.
//! File I/O runs on the blocking thread pool; a process-wide writer lock keeps
//! read-modify-write cycles atomic per issue.

use crate::domain::{Issue, IssueFilter, NewIssue, Status};
use crate::storage::{sort_newest_first, stored_timestamp, IssueStore, StatusChange};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const ISSUES_DIR: &str = "data/issues";
const INDEX_FILE: &str = "data/index.json";

/// Index of all issues in the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Index {
    /// Schema version for future migrations
    schema_version: u32,
    /// List of all issue IDs
    all_ids: Vec<String>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            schema_version: 1,
            all_ids: Vec::new(),
        }
    }
}

/// JSON file storage for issue reports.
///
/// Each issue is stored as a separate JSON file in `data/issues/`, with the
/// list of ids in `data/index.json`. All file writes are atomic (write to
/// temp file, then rename).
#[derive(Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl JsonFileStorage {
    /// Create a new JSON file storage instance at the given root path
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an issue file, or `None` unless `id` is a lowercase hyphenated UUID.
    ///
    /// Other spellings of the same UUID (simple, braced, URN, uppercase) are
    /// not ids this store ever hands out.
    fn issue_path(&self, id: &str) -> Option<PathBuf> {
        let uuid = Uuid::parse_str(id).ok()?;
        if uuid.hyphenated().to_string() != id {
            return None;
        }
        Some(self.root.join(ISSUES_DIR).join(format!("{}.json", id)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| anyhow!("JSON storage writer lock poisoned"))
    }

    fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data).context("Failed to serialize data")?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).context("Failed to write temporary file")?;
        fs::rename(&temp_path, path).context("Failed to rename temporary file")?;

        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<T> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to deserialize {}", path.display()))
    }

    fn load_index(&self) -> Result<Index> {
        self.read_json(&self.root.join(INDEX_FILE))
    }

    fn save_index(&self, index: &Index) -> Result<()> {
        self.write_json(&self.root.join(INDEX_FILE), index)
    }

    fn init_sync(&self) -> Result<()> {
        let _guard = self.lock()?;
        let issues_dir = self.root.join(ISSUES_DIR);
        fs::create_dir_all(&issues_dir).context("Failed to create issues directory")?;

        // Create index.json if it doesn't exist
        let index_path = self.root.join(INDEX_FILE);
        if !index_path.exists() {
            self.write_json(&index_path, &Index::default())?;
        }

        Ok(())
    }

    fn ping_sync(&self) -> Result<()> {
        self.load_index().map(|_| ())
    }

    fn insert_sync(&self, new: NewIssue, created_at: DateTime<Utc>) -> Result<Issue> {
        let id = Uuid::new_v4().to_string();
        let path = self
            .issue_path(&id)
            .ok_or_else(|| anyhow!("Generated invalid issue id: {}", id))?;
        let issue = Issue::from_new(id, new, stored_timestamp(created_at));

        let _guard = self.lock()?;
        self.write_json(&path, &issue)?;

        let indexed = self.load_index().and_then(|mut index| {
            index.all_ids.push(issue.id.clone());
            self.save_index(&index)
        });
        if let Err(e) = indexed {
            // An unindexed file would be readable by id yet missing from listings
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        Ok(issue)
    }

    fn load_sync(&self, id: &str) -> Result<Option<Issue>> {
        match self.issue_path(id) {
            Some(path) if path.exists() => self.read_json(&path).map(Some),
            _ => Ok(None),
        }
    }

    fn list_sync(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let index = self.load_index()?;
        let mut issues = Vec::with_capacity(index.all_ids.len());
        for id in &index.all_ids {
            if let Some(issue) = self.load_sync(id)? {
                if filter.matches(&issue) {
                    issues.push(issue);
                }
            }
        }
        sort_newest_first(&mut issues);
        Ok(issues)
    }

    fn update_status_sync(
        &self,
        id: &str,
        status: Status,
        allowed_from: Option<&[Status]>,
    ) -> Result<StatusChange> {
        let Some(path) = self.issue_path(id) else {
            return Ok(StatusChange::NotFound);
        };

        let _guard = self.lock()?;
        if !path.exists() {
            return Ok(StatusChange::NotFound);
        }

        let mut issue: Issue = self.read_json(&path)?;
        if let Some(allowed) = allowed_from {
            if !allowed.contains(&issue.status) {
                return Ok(StatusChange::Rejected {
                    current: issue.status,
                });
            }
        }

        issue.status = status;
        self.write_json(&path, &issue)?;
        Ok(StatusChange::Updated)
    }

    fn advance_sync(&self, from: Status, to: Status, cutoff: DateTime<Utc>) -> Result<u64> {
        let _guard = self.lock()?;
        let index = self.load_index()?;

        let mut moved = 0;
        for id in &index.all_ids {
            let Some(path) = self.issue_path(id) else {
                continue;
            };
            if !path.exists() {
                continue;
            }
            let mut issue: Issue = self.read_json(&path)?;
            if issue.status == from && issue.created_at <= cutoff {
                issue.status = to;
                self.write_json(&path, &issue)?;
                moved += 1;
            }
        }

        Ok(moved)
    }

    /// Run a synchronous storage operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&JsonFileStorage) -> Result<T> + Send + 'static,
    {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || op(&storage))
            .await
            .context("JSON storage task panicked")?
    }
}

#[async_trait]
impl IssueStore for JsonFileStorage {
    async fn init(&self) -> Result<()> {
        self.blocking(|s| s.init_sync()).await
    }

    async fn ping(&self) -> Result<()> {
        self.blocking(|s| s.ping_sync()).await
    }

    async fn insert_issue(&self, new: NewIssue, created_at: DateTime<Utc>) -> Result<Issue> {
        self.blocking(move |s| s.insert_sync(new, created_at)).await
    }

    async fn load_issue(&self, id: &str) -> Result<Option<Issue>> {
        let id = id.to_string();
        self.blocking(move |s| s.load_sync(&id)).await
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let filter = filter.clone();
        self.blocking(move |s| s.list_sync(&filter)).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: Option<&[Status]>,
    ) -> Result<StatusChange> {
        let id = id.to_string();
        let allowed_from = allowed_from.map(<[Status]>::to_vec);
        self.blocking(move |s| s.update_status_sync(&id, status, allowed_from.as_deref()))
            .await
    }

    async fn advance_status(&self, from: Status, to: Status, cutoff: DateTime<Utc>) -> Result<u64> {
        self.blocking(move |s| s.advance_sync(from, to, cutoff)).await
    }
}
