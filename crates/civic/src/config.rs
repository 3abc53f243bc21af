//! Configuration file loading and parsing.
//!
//! The service reads an optional TOML file. Every section and key is
//! optional; missing values fall back to the defaults documented on each
//! field. The server binary layers CLI flags and environment variables on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::TransitionPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub sweep: SweepConfig,
    pub notify: NotifyConfig,
    /// Rule applied to manual status updates (default: unrestricted).
    pub transition_policy: TransitionPolicy,
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let config: ServiceConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// Which storage backend holds the issues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per issue under `data_dir`
    #[default]
    Json,
    /// Process memory, lost on exit
    Memory,
    /// MongoDB collection (requires the `mongodb` feature)
    Mongodb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(StorageBackend::Json),
            "memory" => Ok(StorageBackend::Memory),
            "mongodb" | "mongo" => Ok(StorageBackend::Mongodb),
            other => Err(format!(
                "unknown storage backend '{}' (expected json, memory or mongodb)",
                other
            )),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend (default: json).
    pub backend: StorageBackend,
    /// Root directory of the JSON backend (default: ".civic").
    pub data_dir: PathBuf,
    /// MongoDB connection string (default: "mongodb://127.0.0.1:27017").
    pub mongodb_uri: String,
    /// MongoDB database name (default: "connect-our-block").
    pub mongodb_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: PathBuf::from(".civic"),
            mongodb_uri: "mongodb://127.0.0.1:27017".to_string(),
            mongodb_db: "connect-our-block".to_string(),
        }
    }
}

/// Timing of the periodic status sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweep ticks (default: 30).
    pub interval_secs: u64,
    /// Age in seconds after which a Pending issue is sent to the authority (default: 60).
    pub dispatch_after_secs: u64,
    /// Age in seconds after which a Sent to Authority issue is resolved (default: 300).
    pub resolve_after_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            dispatch_after_secs: 60,
            resolve_after_secs: 5 * 60,
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn dispatch_after(&self) -> chrono::Duration {
        age(self.dispatch_after_secs)
    }

    pub fn resolve_after(&self) -> chrono::Duration {
        age(self.resolve_after_secs)
    }
}

fn age(secs: u64) -> chrono::Duration {
    // chrono panics above i64::MAX milliseconds
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    chrono::Duration::seconds(secs)
}

/// How notification mail leaves the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    /// Send through the configured SMTP relay
    #[default]
    Smtp,
    /// Only write the rendered message to the log
    Log,
}

/// New-issue notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Delivery mechanism (default: smtp).
    pub transport: MailTransport,
    /// SMTP relay host (default: "smtp.gmail.com").
    pub smtp_host: String,
    /// SMTP port; 465 uses implicit TLS, anything else STARTTLS (default: 587).
    pub smtp_port: u16,
    /// SMTP user, also the sender address when set.
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    /// Recipient of notifications (default: the SMTP user).
    pub notify_email: Option<String>,
    /// Pending notifications held before new ones are dropped (default: 64).
    pub queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            transport: MailTransport::default(),
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            notify_email: None,
            queue_capacity: 64,
        }
    }
}

impl NotifyConfig {
    /// Address notifications go to; `None` disables notifications.
    pub fn recipient(&self) -> Option<&str> {
        self.notify_email
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .or(self.smtp_user.as_deref())
            .filter(|addr| !addr.is_empty())
    }

    /// Sender address.
    pub fn sender(&self) -> &str {
        self.smtp_user
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .unwrap_or("no-reply@example.com")
    }

    /// SMTP credentials, only when both user and password are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.smtp_user.as_deref(), self.smtp_pass.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}
