//! End-to-end pipeline tests on the in-memory store
//!
//! Covers:
//! 1. Quota-bounded partitions leaving untouched work pending
//! 2. Outcome classification as seen in the job table
//! 3. Name de-duplication and link fan-out
//! 4. Failure message truncation
//! 5. Idempotent replay of a persistence pass
//! 6. Empty queue, worker panic and persistence hard stop

use anyhow::Result;
use async_trait::async_trait;
use catalog_enrich::enrich::{
    AuthorCredit, BatchExecutor, BookPayload, BulkPersistence, CatalogStore, Credential,
    EnrichmentOrchestrator, EnrichmentWorker, InMemoryCatalogStore, JobStatus, LookupClient,
    LookupOutcome, NameKind, PersistReport, QuotaTracker, ResultAggregator, RetryPolicy,
};
use catalog_enrich::EnrichError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,catalog_enrich=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Lookup answering from a table; unknown keys get `fallback`
struct ScriptedLookup {
    answers: HashMap<String, LookupOutcome>,
    fallback: LookupOutcome,
    panic_on: Option<String>,
    calls: Mutex<Vec<(usize, String)>>,
}

impl ScriptedLookup {
    fn new(fallback: LookupOutcome) -> Self {
        Self {
            answers: HashMap::new(),
            fallback,
            panic_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn answer(mut self, key: &str, outcome: LookupOutcome) -> Self {
        self.answers.insert(key.to_string(), outcome);
        self
    }

    fn panic_on(mut self, key: &str) -> Self {
        self.panic_on = Some(key.to_string());
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LookupClient for ScriptedLookup {
    async fn lookup(&self, key: &str, credential: &Credential) -> LookupOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((credential.index(), key.to_string()));
        if self.panic_on.as_deref() == Some(key) {
            panic!("lookup blew up for {key}");
        }
        self.answers
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn found(authors: &[&str], tags: &[&str]) -> LookupOutcome {
    LookupOutcome::Found(BookPayload {
        description: Some("An enriched description".to_string()),
        price: Some(12000),
        authors: authors.iter().map(|a| AuthorCredit::new(*a, None)).collect(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        cover_url: Some("https://img.example/cover.jpg".to_string()),
        ..Default::default()
    })
}

fn fast_executor() -> BatchExecutor {
    BatchExecutor::new(2, RetryPolicy::new(3, Duration::from_millis(1)))
}

fn orchestrator(
    store: &Arc<InMemoryCatalogStore>,
    lookup: &Arc<ScriptedLookup>,
    keys: usize,
    limit: u32,
) -> EnrichmentOrchestrator {
    let keys: Vec<String> = (0..keys).map(|i| format!("key-{i}")).collect();
    EnrichmentOrchestrator::new(
        store.clone(),
        lookup.clone(),
        Credential::from_keys(keys),
        limit,
        BulkPersistence::new(store.clone(), fast_executor()),
    )
}

#[tokio::test]
async fn test_spent_credential_leaves_rest_of_partition_pending() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(ScriptedLookup::new(found(&["Kim"], &[])));

    // Partitions [2, 1] across two credentials with a limit of one call each
    let (_, first) = store.add_book(Some("9780000000001"));
    let (_, second) = store.add_book(Some("9780000000002"));
    let (_, third) = store.add_book(Some("9780000000003"));

    let report = orchestrator(&store, &lookup, 2, 1).run().await?;

    assert_eq!(report.pending, 3);
    assert_eq!(report.enriched + report.failed, 2);
    assert_eq!(report.untouched, 1);
    assert!(!report.quota_exhausted);
    assert_eq!(lookup.call_count(), 2);

    assert_eq!(store.job(first).unwrap().enrichment_status, JobStatus::Completed);
    assert_eq!(store.job(third).unwrap().enrichment_status, JobStatus::Completed);

    let untouched = store.job(second).unwrap();
    assert_eq!(untouched.enrichment_status, JobStatus::Pending);
    assert_eq!(untouched.error_message, None);
    assert_eq!(untouched.enrichment_retry_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_not_found_stays_pending_with_reason() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(
        ScriptedLookup::new(found(&[], &[])).answer("0000000000000", LookupOutcome::NotFound),
    );
    let (book, job) = store.add_book(Some("0000000000000"));

    let report = orchestrator(&store, &lookup, 1, 10).run().await?;

    assert_eq!(report.failed, 1);
    assert_eq!(report.persisted.jobs_failed, 1);
    let row = store.job(job).unwrap();
    assert_eq!(row.enrichment_status, JobStatus::Pending);
    assert_eq!(row.error_message.as_deref(), Some("not found"));
    assert_eq!(row.enrichment_retry_count, 1);
    assert_eq!(store.book(book).unwrap().description, None);
    Ok(())
}

#[tokio::test]
async fn test_missing_key_fails_without_lookup() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(ScriptedLookup::new(found(&[], &[])));
    let (_, missing) = store.add_book(None);
    let (_, malformed) = store.add_book(Some("12-34"));

    let report = orchestrator(&store, &lookup, 1, 10).run().await?;

    assert_eq!(report.failed, 2);
    assert_eq!(lookup.call_count(), 0);
    assert_eq!(
        store.job(missing).unwrap().error_message.as_deref(),
        Some("missing external key")
    );
    assert_eq!(
        store.job(malformed).unwrap().error_message.as_deref(),
        Some("invalid external key: 12-34")
    );
    Ok(())
}

#[tokio::test]
async fn test_shared_author_is_stored_once() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(ScriptedLookup::new(found(&["Kim"], &["Fiction"])));
    let books: Vec<i64> = (1..=5)
        .map(|n| store.add_book(Some(&format!("978000000000{n}"))).0)
        .collect();

    let report = orchestrator(&store, &lookup, 2, 10).run().await?;

    assert_eq!(report.enriched, 5);
    assert_eq!(report.persisted.authors_inserted, 1);
    assert_eq!(store.names(NameKind::Author), vec!["Kim".to_string()]);

    let kim = store.name_id(NameKind::Author, "Kim").unwrap();
    let links = store.links(NameKind::Author);
    assert_eq!(links.len(), 5);
    assert!(links.iter().all(|(_, author, role)| *author == kim && role == "author"));

    let mut linked: Vec<i64> = links.iter().map(|(book, _, _)| *book).collect();
    linked.sort_unstable();
    assert_eq!(linked, books);
    assert_eq!(store.links(NameKind::Tag).len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_long_reason_is_truncated() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let detail = "e".repeat(600);
    let lookup = Arc::new(
        ScriptedLookup::new(found(&[], &[]))
            .answer("9780000000001", LookupOutcome::UnknownError(detail)),
    );
    let (_, job) = store.add_book(Some("9780000000001"));

    orchestrator(&store, &lookup, 1, 10).run().await?;

    let message = store.job(job).unwrap().error_message.unwrap();
    assert_eq!(message.chars().count(), 500);
    assert!(message.starts_with("unexpected error: eee"));
    Ok(())
}

#[tokio::test]
async fn test_second_run_only_retries_what_is_pending() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(
        ScriptedLookup::new(found(&["Lee"], &[]))
            .answer("9780000000002", LookupOutcome::NetworkError("reset".into())),
    );
    store.add_book(Some("9780000000001"));
    let (_, flaky) = store.add_book(Some("9780000000002"));
    let orchestrator = orchestrator(&store, &lookup, 1, 10);

    let first = orchestrator.run().await?;
    let second = orchestrator.run().await?;

    assert_eq!(first.pending, 2);
    assert_eq!(first.enriched, 1);
    assert_eq!(second.pending, 1);
    assert_eq!(second.failed, 1);

    let row = store.job(flaky).unwrap();
    assert_eq!(row.enrichment_retry_count, 2);
    assert_eq!(row.error_message.as_deref(), Some("network error: reset"));
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_shuts_down_every_partition() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(
        ScriptedLookup::new(found(&[], &[]))
            .answer("9780000000001", LookupOutcome::RateLimited),
    );
    for n in 1..=6 {
        store.add_book(Some(&format!("978000000000{n}")));
    }

    let report = orchestrator(&store, &lookup, 2, 100).run().await?;

    assert!(report.quota_exhausted);
    assert_eq!(report.enriched + report.failed + report.untouched, report.pending);
    // The first partition stops on its first item
    assert!(report.untouched >= 2);
    assert!(lookup.call_count() < 6);
    Ok(())
}

#[tokio::test]
async fn test_replayed_batch_changes_nothing() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(ScriptedLookup::new(found(&["Kim", "Lee"], &["Poetry"])));
    for n in 1..=3 {
        store.add_book(Some(&format!("978000000000{n}")));
    }

    // Collect one run's results without persisting, then persist them twice
    let aggregator = ResultAggregator::new();
    let worker = EnrichmentWorker::new(
        Credential::new(0, "k"),
        Arc::new(QuotaTracker::new(1, 10)),
        lookup.clone(),
        aggregator.sink(),
    );
    worker.run(store.load_pending().await?).await;
    drop(worker);
    let results = aggregator.finish();

    let persistence = BulkPersistence::new(store.clone(), fast_executor());
    let first = persistence.persist(&results).await?;
    let snapshot = (
        store.names(NameKind::Author),
        store.names(NameKind::Tag),
        store.links(NameKind::Author),
        store.links(NameKind::Tag),
        store.images(),
    );

    let second = persistence.persist(&results).await?;

    assert_eq!(first.authors_inserted, 2);
    assert_eq!(first.author_links_inserted, 6);
    assert_eq!(
        second,
        PersistReport {
            books_updated: 3,
            jobs_completed: 3,
            ..Default::default()
        }
    );
    assert_eq!(
        snapshot,
        (
            store.names(NameKind::Author),
            store.names(NameKind::Tag),
            store.links(NameKind::Author),
            store.links(NameKind::Tag),
            store.images(),
        )
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_queue_has_no_side_effects() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(ScriptedLookup::new(found(&["Kim"], &[])));

    let report = orchestrator(&store, &lookup, 3, 10).run().await?;

    assert_eq!(report.pending, 0);
    assert_eq!(report.persisted, PersistReport::default());
    assert_eq!(lookup.call_count(), 0);
    assert!(store.names(NameKind::Author).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_panicking_worker_does_not_sink_the_run() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(ScriptedLookup::new(found(&[], &[])).panic_on("9780000000001"));
    let (_, doomed) = store.add_book(Some("9780000000001"));
    let (_, healthy) = store.add_book(Some("9780000000002"));

    let report = orchestrator(&store, &lookup, 2, 10).run().await?;

    assert_eq!(report.enriched, 1);
    assert_eq!(report.untouched, 1);
    assert_eq!(store.job(healthy).unwrap().enrichment_status, JobStatus::Completed);
    assert_eq!(store.job(doomed).unwrap().enrichment_status, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_persistence_outage_fails_the_run() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let lookup = Arc::new(ScriptedLookup::new(found(&["Kim"], &[])));
    let (_, job) = store.add_book(Some("9780000000001"));
    store.fail_next("mark_completed", 3);

    let err = orchestrator(&store, &lookup, 1, 10).run().await.unwrap_err();

    assert!(matches!(
        err,
        EnrichError::Persist {
            operation: "mark_completed",
            attempts: 3,
            ..
        }
    ));
    assert_eq!(store.job(job).unwrap().enrichment_status, JobStatus::Pending);
    Ok(())
}
