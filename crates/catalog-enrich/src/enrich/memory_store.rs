//! In-process [`CatalogStore`]
//!
//! Mirrors the Postgres schema's uniqueness rules (unique names, unique link pairs,
//! unique `(book, url)` images) over ordered maps. Used by tests and for local dry runs.
//! Transient failures can be scheduled per operation to exercise the retry path.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::models::{EnrichedRecord, JobCounts, JobStatus, WorkItem};
use super::store::{
    CatalogStore, ImageRow, JobFailure, LinkRow, NameKind, StoreError, StoreResult,
};

/// Stored book columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookRow {
    pub id: i64,
    pub isbn: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub published_date: Option<NaiveDate>,
    pub subtitle: Option<String>,
    pub page_count: Option<i32>,
    pub toc: Option<String>,
}

/// Stored `book_jobs` columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: i64,
    pub book_id: i64,
    pub enrichment_status: JobStatus,
    pub embedding_status: JobStatus,
    pub error_message: Option<String>,
    pub enrichment_retry_count: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    books: BTreeMap<i64, BookRow>,
    jobs: BTreeMap<i64, JobRow>,
    names: HashMap<NameKind, BTreeMap<String, i64>>,
    /// (book, target) -> role; tag links use an empty role
    links: HashMap<NameKind, BTreeMap<(i64, i64), String>>,
    images: BTreeSet<ImageRow>,
    next_id: i64,
    /// Operation name -> remaining scheduled transient failures
    failures: HashMap<&'static str, u32>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&mut self, operation: &'static str) -> StoreResult<()> {
        match self.failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Transient(format!("injected failure in {operation}")))
            },
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: Mutex<State>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a book with a pending job; returns `(book_id, job_id)`
    pub fn add_book(&self, isbn: Option<&str>) -> (i64, i64) {
        let mut state = self.state();
        let book_id = state.next_id();
        state.books.insert(
            book_id,
            BookRow {
                id: book_id,
                isbn: isbn.map(str::to_string),
                ..Default::default()
            },
        );

        let job_id = state.next_id();
        state.jobs.insert(
            job_id,
            JobRow {
                id: job_id,
                book_id,
                enrichment_status: JobStatus::Pending,
                embedding_status: JobStatus::Pending,
                error_message: None,
                enrichment_retry_count: 0,
                updated_at: Utc::now(),
            },
        );

        (book_id, job_id)
    }

    /// Make the next `times` calls of `operation` fail with a transient error
    ///
    /// `operation` is the trait method name, e.g. `"insert_links"`.
    pub fn fail_next(&self, operation: &'static str, times: u32) {
        self.state().failures.insert(operation, times);
    }

    pub fn book(&self, book_id: i64) -> Option<BookRow> {
        self.state().books.get(&book_id).cloned()
    }

    pub fn job(&self, job_id: i64) -> Option<JobRow> {
        self.state().jobs.get(&job_id).cloned()
    }

    /// Names in the given store, sorted
    pub fn names(&self, kind: NameKind) -> Vec<String> {
        self.state()
            .names
            .get(&kind)
            .map(|names| names.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn name_id(&self, kind: NameKind, name: &str) -> Option<i64> {
        self.state().names.get(&kind)?.get(name).copied()
    }

    /// `(book_id, target_id, role)` triples; role is empty for tags
    pub fn links(&self, kind: NameKind) -> Vec<(i64, i64, String)> {
        self.state()
            .links
            .get(&kind)
            .map(|links| {
                links
                    .iter()
                    .map(|((book, target), role)| (*book, *target, role.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn images(&self) -> Vec<ImageRow> {
        self.state().images.iter().cloned().collect()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn load_pending(&self) -> StoreResult<Vec<WorkItem>> {
        let mut state = self.state();
        state.check("load_pending")?;

        Ok(state
            .jobs
            .values()
            .filter(|job| job.enrichment_status == JobStatus::Pending)
            .filter_map(|job| {
                state.books.get(&job.book_id).map(|book| WorkItem {
                    record_id: book.id,
                    external_key: book.isbn.clone(),
                    job_id: job.id,
                })
            })
            .collect())
    }

    async fn count_jobs(&self) -> StoreResult<JobCounts> {
        let mut state = self.state();
        state.check("count_jobs")?;

        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            match job.enrichment_status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Completed => counts.completed += 1,
            }
        }
        Ok(counts)
    }

    async fn insert_names(&self, kind: NameKind, names: &[String]) -> StoreResult<u64> {
        let mut state = self.state();
        state.check("insert_names")?;

        let mut inserted = 0;
        for name in names {
            if state.names.get(&kind).is_some_and(|n| n.contains_key(name)) {
                continue;
            }
            let id = state.next_id();
            state.names.entry(kind).or_default().insert(name.clone(), id);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn resolve_names(
        &self,
        kind: NameKind,
        names: &[String],
    ) -> StoreResult<Vec<(String, i64)>> {
        let mut state = self.state();
        state.check("resolve_names")?;

        let Some(known) = state.names.get(&kind) else {
            return Ok(Vec::new());
        };
        Ok(names
            .iter()
            .filter_map(|name| known.get(name).map(|id| (name.clone(), *id)))
            .collect())
    }

    async fn update_books(&self, records: &[EnrichedRecord]) -> StoreResult<u64> {
        let mut state = self.state();
        state.check("update_books")?;

        let mut updated = 0;
        for record in records {
            let Some(book) = state.books.get_mut(&record.record_id) else {
                continue;
            };
            // Absent fields keep the stored value, matching COALESCE in SQL
            if record.description.is_some() {
                book.description = record.description.clone();
            }
            if record.price.is_some() {
                book.price = record.price;
            }
            if record.published_date.is_some() {
                book.published_date = record.published_date;
            }
            if record.subtitle.is_some() {
                book.subtitle = record.subtitle.clone();
            }
            if record.page_count.is_some() {
                book.page_count = record.page_count;
            }
            if record.toc.is_some() {
                book.toc = record.toc.clone();
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn insert_links(&self, kind: NameKind, links: &[LinkRow]) -> StoreResult<u64> {
        let mut state = self.state();
        state.check("insert_links")?;

        let mut inserted = 0;
        for link in links {
            let known_book = state.books.contains_key(&link.record_id);
            let known_target = state
                .names
                .get(&kind)
                .is_some_and(|names| names.values().any(|id| *id == link.target_id));
            if !known_book || !known_target {
                return Err(StoreError::Permanent(format!(
                    "{} link ({}, {}) violates a foreign key",
                    kind.as_str(),
                    link.record_id,
                    link.target_id
                )));
            }

            let table = state.links.entry(kind).or_default();
            if let std::collections::btree_map::Entry::Vacant(slot) =
                table.entry((link.record_id, link.target_id))
            {
                slot.insert(link.role.clone().unwrap_or_default());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_images(&self, images: &[ImageRow]) -> StoreResult<u64> {
        let mut state = self.state();
        state.check("insert_images")?;

        let mut inserted = 0;
        for image in images {
            if state.images.insert(image.clone()) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn mark_completed(&self, job_ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.state();
        state.check("mark_completed")?;

        let now = Utc::now();
        let mut updated = 0;
        for id in job_ids {
            if let Some(job) = state.jobs.get_mut(id) {
                job.enrichment_status = JobStatus::Completed;
                job.error_message = None;
                job.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn record_failures(&self, failures: &[JobFailure]) -> StoreResult<u64> {
        let mut state = self.state();
        state.check("record_failures")?;

        let now = Utc::now();
        let mut updated = 0;
        for failure in failures {
            let Some(job) = state.jobs.get_mut(&failure.job_id) else {
                continue;
            };
            if job.enrichment_status != JobStatus::Pending {
                continue;
            }
            job.error_message = Some(failure.message.clone());
            job.enrichment_retry_count += 1;
            job.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }
}
