//! Core types flowing through the enrichment pipeline

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default role recorded for an author credit when upstream gives none
pub const DEFAULT_AUTHOR_ROLE: &str = "author";

/// One pending enrichment job, loaded from a PENDING `book_jobs` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub record_id: i64,
    /// Raw ISBN as stored on the book; may be missing or malformed
    pub external_key: Option<String>,
    pub job_id: i64,
}

/// Contributor credit on a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorCredit {
    pub name: String,
    pub role: String,
}

impl AuthorCredit {
    pub fn new(name: impl Into<String>, role: Option<&str>) -> Self {
        let role = role
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_AUTHOR_ROLE);
        Self {
            name: name.into(),
            role: role.to_string(),
        }
    }
}

/// Book details returned by a successful lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPayload {
    pub description: Option<String>,
    pub price: Option<i64>,
    pub published_date: Option<NaiveDate>,
    pub subtitle: Option<String>,
    pub page_count: Option<i32>,
    pub toc: Option<String>,
    pub authors: Vec<AuthorCredit>,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
}

/// Result of a single upstream lookup; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(BookPayload),
    NotFound,
    /// Upstream signalled that the credential's quota is spent
    RateLimited,
    NetworkError(String),
    UnknownError(String),
}

/// Enriched book ready for bulk persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub record_id: i64,
    pub job_id: i64,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub published_date: Option<NaiveDate>,
    pub subtitle: Option<String>,
    pub page_count: Option<i32>,
    pub toc: Option<String>,
    pub authors: Vec<AuthorCredit>,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
}

impl EnrichedRecord {
    /// Build a record from a `Found` payload, normalizing blank text and duplicate names
    pub fn from_payload(item: &WorkItem, payload: BookPayload) -> Self {
        let mut authors: Vec<AuthorCredit> = Vec::with_capacity(payload.authors.len());
        for credit in payload.authors {
            let name = credit.name.trim();
            if name.is_empty() || authors.iter().any(|a| a.name == name) {
                continue;
            }
            authors.push(AuthorCredit::new(name, Some(credit.role.as_str())));
        }

        let mut tags: Vec<String> = Vec::with_capacity(payload.tags.len());
        for tag in payload.tags {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }

        Self {
            record_id: item.record_id,
            job_id: item.job_id,
            description: non_blank(payload.description),
            price: payload.price.filter(|p| *p >= 0),
            published_date: payload.published_date,
            subtitle: non_blank(payload.subtitle),
            page_count: payload.page_count.filter(|p| *p > 0),
            toc: non_blank(payload.toc),
            authors,
            tags,
            cover_url: non_blank(payload.cover_url),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Failure taxonomy for a single work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing or malformed external key; the lookup was never attempted
    Validation,
    /// Lookup succeeded but upstream has no data for the key
    NotFound,
    /// Network trouble; retried on the next run
    Transient,
    /// Upstream quota violation; stops further calls this run
    QuotaExhausted,
    /// Unexpected upstream response
    Defect,
}

impl FailureKind {
    pub fn retryable(self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::QuotaExhausted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not_found",
            FailureKind::Transient => "transient",
            FailureKind::QuotaExhausted => "quota_exhausted",
            FailureKind::Defect => "defect",
        }
    }
}

/// Terminal failure for one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub record_id: i64,
    pub job_id: i64,
    pub reason: String,
    pub retryable: bool,
    pub kind: FailureKind,
}

impl FailureRecord {
    pub fn new(item: &WorkItem, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            record_id: item.record_id,
            job_id: item.job_id,
            reason: reason.into(),
            retryable: kind.retryable(),
            kind,
        }
    }

    pub fn not_found(item: &WorkItem) -> Self {
        Self::new(item, FailureKind::NotFound, "not found")
    }

    pub fn quota_exhausted(item: &WorkItem) -> Self {
        Self::new(item, FailureKind::QuotaExhausted, "quota exceeded")
    }

    pub fn network(item: &WorkItem, detail: &str) -> Self {
        Self::new(item, FailureKind::Transient, format!("network error: {detail}"))
    }

    pub fn defect(item: &WorkItem, detail: &str) -> Self {
        Self::new(item, FailureKind::Defect, format!("unexpected error: {detail}"))
    }
}

/// Phase status on a `book_jobs` row
///
/// Failures stay `Pending` with an error message; there is no failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => JobStatus::Completed,
            _ => JobStatus::Pending,
        }
    }
}

/// Enrichment queue depth
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: i64,
    pub completed: i64,
}
