//! MongoDB storage implementation.
//!
//! Issues live in a single `issues` collection indexed by
//! `(userId, dateCreated desc)` and `(status, dateCreated desc)`. Status
//! changes rely on MongoDB's per-document atomic updates.

use crate::domain::{Issue, IssueFilter, NewIssue, Status};
use crate::storage::{stored_timestamp, IssueStore, StatusChange};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::info;

const COLLECTION: &str = "issues";

/// Stored shape of an issue document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    user_id: String,
    user_name: String,
    title: String,
    description: String,
    #[serde(default)]
    photo_path: Option<String>,
    #[serde(default)]
    location: String,
    status: Status,
    date_created: bson::DateTime,
}

impl IssueDocument {
    fn from_new(new: NewIssue, created_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            user_id: new.user_id,
            user_name: new.user_name,
            title: new.title,
            description: new.description,
            photo_path: new.photo_path,
            location: new.location,
            status: Status::Pending,
            date_created: to_bson_time(created_at),
        }
    }

    fn into_issue(self) -> Result<Issue> {
        let id = self
            .id
            .ok_or_else(|| anyhow!("Issue document without _id"))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.date_created.timestamp_millis())
            .ok_or_else(|| anyhow!("Issue {} has an out-of-range dateCreated", id.to_hex()))?;

        Ok(Issue {
            id: id.to_hex(),
            user_id: self.user_id,
            user_name: self.user_name,
            title: self.title,
            description: self.description,
            photo_path: self.photo_path,
            location: self.location,
            status: self.status,
            created_at,
        })
    }
}

fn to_bson_time(value: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(value.timestamp_millis())
}

/// MongoDB-backed issue store.
///
/// Cloning is cheap; clones share the driver's connection pool.
#[derive(Clone)]
pub struct MongoStorage {
    database: Database,
    issues: Collection<IssueDocument>,
}

impl MongoStorage {
    /// Connect to `uri` and use database `db_name`.
    ///
    /// The driver connects lazily; call [`IssueStore::init`] to verify the
    /// connection and create indexes.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .with_context(|| format!("Failed to parse MongoDB URI {}", uri))?;
        let database = client.database(db_name);
        let issues = database.collection::<IssueDocument>(COLLECTION);
        Ok(Self { database, issues })
    }
}

#[async_trait]
impl IssueStore for MongoStorage {
    async fn init(&self) -> Result<()> {
        self.ping().await?;

        let by_user = IndexModel::builder()
            .keys(doc! { "userId": 1, "dateCreated": -1 })
            .build();
        let by_status = IndexModel::builder()
            .keys(doc! { "status": 1, "dateCreated": -1 })
            .build();
        self.issues
            .create_indexes([by_user, by_status])
            .await
            .context("Failed to create issue indexes")?;

        info!(database = %self.database.name(), "MongoDB issue collection ready");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    async fn insert_issue(&self, new: NewIssue, created_at: DateTime<Utc>) -> Result<Issue> {
        let mut document = IssueDocument::from_new(new, stored_timestamp(created_at));
        let result = self
            .issues
            .insert_one(&document)
            .await
            .context("Failed to insert issue")?;

        let id = result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow!("Inserted issue id is not an ObjectId"))?;
        document.id = Some(id);
        document.into_issue()
    }

    async fn load_issue(&self, id: &str) -> Result<Option<Issue>> {
        let Ok(oid) = ObjectId::parse_str(id) else {
            return Ok(None);
        };
        self.issues
            .find_one(doc! { "_id": oid })
            .await
            .with_context(|| format!("Failed to load issue {}", id))?
            .map(IssueDocument::into_issue)
            .transpose()
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let mut query = Document::new();
        if let Some(user_id) = &filter.user_id {
            query.insert("userId", user_id.as_str());
        }

        let documents: Vec<IssueDocument> = self
            .issues
            .find(query)
            .sort(doc! { "dateCreated": -1 })
            .await
            .context("Failed to query issues")?
            .try_collect()
            .await
            .context("Failed to read issue cursor")?;

        documents.into_iter().map(IssueDocument::into_issue).collect()
    }

    async fn update_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: Option<&[Status]>,
    ) -> Result<StatusChange> {
        let Ok(oid) = ObjectId::parse_str(id) else {
            return Ok(StatusChange::NotFound);
        };

        let mut filter = doc! { "_id": oid };
        if let Some(allowed) = allowed_from {
            let allowed: Vec<&str> = allowed.iter().map(Status::as_str).collect();
            filter.insert("status", doc! { "$in": allowed });
        }

        let result = self
            .issues
            .update_one(filter, doc! { "$set": { "status": status.as_str() } })
            .await
            .with_context(|| format!("Failed to update status of issue {}", id))?;
        if result.matched_count > 0 {
            return Ok(StatusChange::Updated);
        }
        if allowed_from.is_none() {
            return Ok(StatusChange::NotFound);
        }

        // Matched nothing under the policy filter: absent, or in a disallowed status
        match self.load_issue(id).await? {
            Some(current) => Ok(StatusChange::Rejected {
                current: current.status,
            }),
            None => Ok(StatusChange::NotFound),
        }
    }

    async fn advance_status(&self, from: Status, to: Status, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = self
            .issues
            .update_many(
                doc! {
                    "status": from.as_str(),
                    "dateCreated": { "$lte": to_bson_time(cutoff) },
                },
                doc! { "$set": { "status": to.as_str() } },
            )
            .await
            .with_context(|| format!("Failed to advance issues from '{}' to '{}'", from, to))?;
        Ok(result.modified_count)
    }
}
