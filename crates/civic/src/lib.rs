//! Civic Issue Reporting Library
//!
//! Storage, status lifecycle and notifications for citizen-submitted civic
//! issue reports. The HTTP surface lives in the `civic-server` crate.

pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod service;
pub mod storage;
pub mod sweep;

// Re-export commonly used types
pub use config::ServiceConfig;
pub use domain::{Issue, IssueSubmission, Status, TransitionPolicy};
pub use errors::{IssueError, IssueResult};
pub use service::IssueService;
pub use storage::{InMemoryStorage, IssueStore, JsonFileStorage};
pub use sweep::{SweepReport, Sweeper};
