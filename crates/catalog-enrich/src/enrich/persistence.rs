//! Bulk persistence of one run's results
//!
//! Steps run in dependency order, each through the shared [`BatchExecutor`]:
//!
//! 1. Author names: insert-if-absent, then resolve name to id
//! 2. Tag names: same
//! 3. Book field updates keyed by record id
//! 4. Author and tag links (pairs whose id did not resolve are skipped)
//! 5. Cover images
//! 6. Job status: successes completed, failures keep PENDING with the latest message
//!
//! The whole sequence is idempotent: replaying the same results adds no rows.

use catalog_common::text::truncate_chars;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::aggregator::EnrichmentResults;
use super::batch::BatchExecutor;
use super::models::EnrichedRecord;
use super::store::{CatalogStore, ImageRow, JobFailure, LinkRow, NameKind};
use crate::error::Result;

pub const DEFAULT_ERROR_MESSAGE_MAX_LEN: usize = 500;

/// Rows changed by one persistence pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub authors_inserted: u64,
    pub tags_inserted: u64,
    pub books_updated: u64,
    pub author_links_inserted: u64,
    pub tag_links_inserted: u64,
    /// Link pairs dropped because the name never resolved to an id
    pub links_skipped: usize,
    pub images_inserted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

pub struct BulkPersistence {
    store: Arc<dyn CatalogStore>,
    executor: BatchExecutor,
    error_message_max_len: usize,
}

impl BulkPersistence {
    pub fn new(store: Arc<dyn CatalogStore>, executor: BatchExecutor) -> Self {
        Self {
            store,
            executor,
            error_message_max_len: DEFAULT_ERROR_MESSAGE_MAX_LEN,
        }
    }

    pub fn with_error_message_max_len(mut self, max_chars: usize) -> Self {
        self.error_message_max_len = max_chars;
        self
    }

    pub async fn persist(&self, results: &EnrichmentResults) -> Result<PersistReport> {
        let mut report = PersistReport::default();
        let enriched = &results.enriched;

        let (inserted, author_ids) = self.store_names(NameKind::Author, enriched).await?;
        report.authors_inserted = inserted;

        let (inserted, tag_ids) = self.store_names(NameKind::Tag, enriched).await?;
        report.tags_inserted = inserted;

        let store = &self.store;
        report.books_updated = self
            .executor
            .run("update_books", enriched, move |chunk| store.update_books(chunk))
            .await?
            .into_iter()
            .sum();

        let (author_links, skipped) = link_rows(NameKind::Author, enriched, &author_ids);
        report.links_skipped += skipped;
        report.author_links_inserted = self.store_links(NameKind::Author, &author_links).await?;

        let (tag_links, skipped) = link_rows(NameKind::Tag, enriched, &tag_ids);
        report.links_skipped += skipped;
        report.tag_links_inserted = self.store_links(NameKind::Tag, &tag_links).await?;

        let images = image_rows(enriched);
        report.images_inserted = self
            .executor
            .run("insert_images", &images, move |chunk| store.insert_images(chunk))
            .await?
            .into_iter()
            .sum();

        let completed: Vec<i64> = enriched
            .iter()
            .map(|r| r.job_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        report.jobs_completed = self
            .executor
            .run("mark_completed", &completed, move |chunk| store.mark_completed(chunk))
            .await?
            .into_iter()
            .sum();

        let failures = self.job_failures(results);
        report.jobs_failed = self
            .executor
            .run("record_failures", &failures, move |chunk| store.record_failures(chunk))
            .await?
            .into_iter()
            .sum();

        if report.links_skipped > 0 {
            warn!(skipped = report.links_skipped, "Some links referenced unresolved names");
        }
        info!(?report, "Persisted enrichment results");

        Ok(report)
    }

    /// Insert the distinct names of `kind` and resolve them to ids
    async fn store_names(
        &self,
        kind: NameKind,
        records: &[EnrichedRecord],
    ) -> Result<(u64, HashMap<String, i64>)> {
        let names: Vec<String> = match kind {
            NameKind::Author => records
                .iter()
                .flat_map(|r| r.authors.iter().map(|a| a.name.clone()))
                .collect::<BTreeSet<_>>(),
            NameKind::Tag => records
                .iter()
                .flat_map(|r| r.tags.iter().cloned())
                .collect::<BTreeSet<_>>(),
        }
        .into_iter()
        .collect();

        let store = &self.store;
        let inserted: u64 = self
            .executor
            .run("insert_names", &names, move |chunk| store.insert_names(kind, chunk))
            .await?
            .into_iter()
            .sum();

        let ids: HashMap<String, i64> = self
            .executor
            .run("resolve_names", &names, move |chunk| store.resolve_names(kind, chunk))
            .await?
            .into_iter()
            .flatten()
            .collect();

        info!(
            kind = kind.as_str(),
            distinct = names.len(),
            inserted,
            resolved = ids.len(),
            "Stored names"
        );
        Ok((inserted, ids))
    }

    async fn store_links(&self, kind: NameKind, links: &[LinkRow]) -> Result<u64> {
        let store = &self.store;
        Ok(self
            .executor
            .run("insert_links", links, move |chunk| store.insert_links(kind, chunk))
            .await?
            .into_iter()
            .sum())
    }

    /// One message per job, truncated; a repeated job keeps its last reason
    fn job_failures(&self, results: &EnrichmentResults) -> Vec<JobFailure> {
        let mut by_job: BTreeMap<i64, &str> = BTreeMap::new();
        for failure in &results.failed {
            by_job.insert(failure.job_id, failure.reason.as_str());
        }

        by_job
            .into_iter()
            .map(|(job_id, reason)| JobFailure {
                job_id,
                message: truncate_chars(reason, self.error_message_max_len).to_string(),
            })
            .collect()
    }
}

/// Distinct (record, target) pairs plus the number of pairs skipped for a missing id
fn link_rows(
    kind: NameKind,
    records: &[EnrichedRecord],
    ids: &HashMap<String, i64>,
) -> (Vec<LinkRow>, usize) {
    let mut seen: HashSet<(i64, i64)> = HashSet::new();
    let mut rows = Vec::new();
    let mut skipped = 0;

    for record in records {
        let targets: Vec<(&str, Option<&str>)> = match kind {
            NameKind::Author => record
                .authors
                .iter()
                .map(|a| (a.name.as_str(), Some(a.role.as_str())))
                .collect(),
            NameKind::Tag => record.tags.iter().map(|t| (t.as_str(), None)).collect(),
        };

        for (name, role) in targets {
            let Some(&target_id) = ids.get(name) else {
                warn!(
                    kind = kind.as_str(),
                    record_id = record.record_id,
                    name,
                    "Name did not resolve, skipping link"
                );
                skipped += 1;
                continue;
            };
            if seen.insert((record.record_id, target_id)) {
                rows.push(LinkRow {
                    record_id: record.record_id,
                    target_id,
                    role: role.map(str::to_string),
                });
            }
        }
    }

    (rows, skipped)
}

fn image_rows(records: &[EnrichedRecord]) -> Vec<ImageRow> {
    records
        .iter()
        .filter_map(|r| {
            r.cover_url.as_ref().map(|url| ImageRow {
                record_id: r.record_id,
                url: url.clone(),
            })
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
