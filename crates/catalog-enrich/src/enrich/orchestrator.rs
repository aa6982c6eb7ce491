//! Pipeline orchestration
//!
//! One run walks `LoadPending -> Dispatch -> Persist -> Done`:
//!
//! - **LoadPending**: read every job whose enrichment phase is pending. An empty queue
//!   goes straight to `Done` without touching quota or storage.
//! - **Dispatch**: reset the quota epoch, split the queue across credentials and run one
//!   task per partition until all of them join.
//! - **Persist**: always runs once dispatch happened, even with zero successes, so failure
//!   messages land before the next run.
//!
//! Nothing is written before `Persist`. A crash mid-dispatch leaves every job pending and
//! the next run simply reads them again.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::aggregator::{EnrichmentResults, ResultAggregator};
use super::lookup::LookupClient;
use super::models::WorkItem;
use super::partition::partition;
use super::persistence::{BulkPersistence, PersistReport};
use super::quota::{Credential, QuotaTracker};
use super::store::CatalogStore;
use super::worker::{EnrichmentWorker, PartitionSummary};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    LoadPending,
    Dispatch,
    Persist,
    Done,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::LoadPending => "load_pending",
            PipelineState::Dispatch => "dispatch",
            PipelineState::Persist => "persist",
            PipelineState::Done => "done",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Jobs read in `LoadPending`
    pub pending: usize,
    pub enriched: usize,
    pub failed: usize,
    /// Jobs no worker reached; still pending
    pub untouched: usize,
    /// Upstream signalled a hard quota violation during dispatch
    pub quota_exhausted: bool,
    pub persisted: PersistReport,
    pub duration: Duration,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            pending: 0,
            enriched: 0,
            failed: 0,
            untouched: 0,
            quota_exhausted: false,
            persisted: PersistReport::default(),
            duration: Duration::ZERO,
        }
    }
}

pub struct EnrichmentOrchestrator {
    store: Arc<dyn CatalogStore>,
    lookup: Arc<dyn LookupClient>,
    credentials: Vec<Credential>,
    quota: Arc<QuotaTracker>,
    persistence: BulkPersistence,
}

impl EnrichmentOrchestrator {
    /// `credentials` must be numbered `0..n`, as [`Credential::from_keys`] does
    pub fn new(
        store: Arc<dyn CatalogStore>,
        lookup: Arc<dyn LookupClient>,
        credentials: Vec<Credential>,
        daily_limit: u32,
        persistence: BulkPersistence,
    ) -> Self {
        let quota = Arc::new(QuotaTracker::new(credentials.len(), daily_limit));
        Self {
            store,
            lookup,
            credentials,
            quota,
            persistence,
        }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Execute one full run
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("enrichment_run", %run_id);
        self.run_states(run_id).instrument(span).await
    }

    async fn run_states(&self, run_id: Uuid) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new(run_id);
        let mut pending: Vec<WorkItem> = Vec::new();
        let mut results = EnrichmentResults::default();
        let mut state = PipelineState::LoadPending;

        while state != PipelineState::Done {
            info!(%state, "Entering pipeline state");

            state = match state {
                PipelineState::LoadPending => {
                    pending = self.store.load_pending().await?;
                    report.pending = pending.len();
                    info!(pending = report.pending, "Loaded pending jobs");

                    if pending.is_empty() {
                        PipelineState::Done
                    } else {
                        PipelineState::Dispatch
                    }
                },
                PipelineState::Dispatch => {
                    results = self.dispatch(std::mem::take(&mut pending)).await;
                    report.enriched = results.enriched.len();
                    report.failed = results.failed.len();
                    report.untouched = report.pending.saturating_sub(results.len());
                    report.quota_exhausted = self.quota.is_exhausted();
                    PipelineState::Persist
                },
                PipelineState::Persist => {
                    report.persisted = self.persistence.persist(&results).await?;
                    PipelineState::Done
                },
                PipelineState::Done => PipelineState::Done,
            };
        }

        report.duration = started.elapsed();
        info!(
            pending = report.pending,
            enriched = report.enriched,
            failed = report.failed,
            untouched = report.untouched,
            quota_exhausted = report.quota_exhausted,
            duration_ms = report.duration.as_millis() as u64,
            "Enrichment run finished"
        );
        Ok(report)
    }

    /// Run every partition to completion and collect their results
    async fn dispatch(&self, items: Vec<WorkItem>) -> EnrichmentResults {
        self.quota.reset();

        let aggregator = ResultAggregator::new();
        let partitions = partition(items, self.credentials.len());
        let mut handles = Vec::with_capacity(partitions.len());

        for (credential, slice) in self.credentials.iter().zip(partitions) {
            let worker = EnrichmentWorker::new(
                credential.clone(),
                self.quota.clone(),
                self.lookup.clone(),
                aggregator.sink(),
            );
            let span = info_span!(
                "partition",
                credential = credential.index(),
                items = slice.len()
            );
            handles.push(tokio::spawn(async move { worker.run(slice).await }.instrument(span)));
        }

        for (idx, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(summary) => log_summary(&summary),
                Err(e) => {
                    // Results it recorded before dying are kept; the rest stays pending
                    error!(worker = idx, error = %e, "Worker panicked");
                },
            }
        }

        aggregator.finish()
    }
}

fn log_summary(summary: &PartitionSummary) {
    info!(
        credential = summary.credential,
        assigned = summary.assigned,
        enriched = summary.enriched,
        failed = summary.failed,
        untouched = summary.untouched,
        stopped = ?summary.stopped,
        "Partition finished"
    );
}
