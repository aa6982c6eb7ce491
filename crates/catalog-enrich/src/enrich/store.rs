//! Persistence contract for the enrichment pipeline
//!
//! Every method works on one already-chunked slice; chunking and retries live in
//! [`BatchExecutor`](super::batch::BatchExecutor). Inserts are insert-if-absent, so
//! running the same slice twice leaves the store unchanged after the first call.

use async_trait::async_trait;
use thiserror::Error;

use super::models::{EnrichedRecord, JobCounts, WorkItem};

/// SQLSTATE codes that signal lock or resource contention
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57014", // query_canceled (statement timeout)
];

/// Storage failure, split by whether a retry can help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&&*code)),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
            _ => false,
        };

        if transient {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Permanent(err.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which name store and link table an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Author,
    Tag,
}

impl NameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NameKind::Author => "author",
            NameKind::Tag => "tag",
        }
    }

    pub(crate) fn name_table(self) -> &'static str {
        match self {
            NameKind::Author => "authors",
            NameKind::Tag => "tags",
        }
    }

    pub(crate) fn link_table(self) -> &'static str {
        match self {
            NameKind::Author => "book_authors",
            NameKind::Tag => "book_tags",
        }
    }

    pub(crate) fn link_column(self) -> &'static str {
        match self {
            NameKind::Author => "author_id",
            NameKind::Tag => "tag_id",
        }
    }

    /// Author links carry a contributor role; tag links do not
    pub(crate) fn has_role(self) -> bool {
        matches!(self, NameKind::Author)
    }
}

/// Book to author/tag link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub record_id: i64,
    pub target_id: i64,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageRow {
    pub record_id: i64,
    pub url: String,
}

/// Latest error for a job that stays pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job_id: i64,
    pub message: String,
}

/// Storage collaborator for the whole pipeline
///
/// Counts returned by the write methods are rows actually changed, so an idempotent
/// replay reports zero inserts.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every job whose enrichment phase is pending, oldest first
    async fn load_pending(&self) -> StoreResult<Vec<WorkItem>>;

    async fn count_jobs(&self) -> StoreResult<JobCounts>;

    /// Insert names that are not present yet
    async fn insert_names(&self, kind: NameKind, names: &[String]) -> StoreResult<u64>;

    /// Map names to ids; unknown names are absent from the result
    async fn resolve_names(
        &self,
        kind: NameKind,
        names: &[String],
    ) -> StoreResult<Vec<(String, i64)>>;

    /// Set-based update of the mutable book fields; unknown ids are ignored
    async fn update_books(&self, records: &[EnrichedRecord]) -> StoreResult<u64>;

    async fn insert_links(&self, kind: NameKind, links: &[LinkRow]) -> StoreResult<u64>;

    async fn insert_images(&self, images: &[ImageRow]) -> StoreResult<u64>;

    /// Enrichment phase to completed, error message cleared
    async fn mark_completed(&self, job_ids: &[i64]) -> StoreResult<u64>;

    /// Overwrite the error message and bump the retry counter; status stays pending
    async fn record_failures(&self, failures: &[JobFailure]) -> StoreResult<u64>;
}
