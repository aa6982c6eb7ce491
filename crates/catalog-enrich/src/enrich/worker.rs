//! Enrichment worker: drains one partition with one credential
//!
//! Items are processed strictly in order. Per item:
//! 1. Validate the external key (no quota is spent on a malformed key)
//! 2. Reserve one call on this worker's credential; a refusal ends the partition and
//!    leaves the rest of the slice untouched for the next run
//! 3. Call the lookup service and classify the outcome
//!
//! Key validation runs before the quota check, so a malformed key is recorded as a
//! validation failure even after this credential is spent. Only items with a valid key
//! are left untouched by a quota stop.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::aggregator::ResultSink;
use super::isbn;
use super::lookup::LookupClient;
use super::models::{EnrichedRecord, FailureKind, FailureRecord, LookupOutcome, WorkItem};
use super::quota::{Credential, QuotaTracker};

/// Why a partition stopped before its last item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// This credential reached its limit
    QuotaSpent,
    /// Another worker saw a hard quota violation and raised the global flag
    GloballyExhausted,
    /// Upstream rejected this worker's call as over quota
    UpstreamRateLimited,
}

/// Per-partition accounting returned when a worker finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub credential: usize,
    pub assigned: usize,
    pub enriched: usize,
    pub failed: usize,
    /// Items never looked at; they stay PENDING
    pub untouched: usize,
    pub stopped: Option<StopReason>,
}

impl PartitionSummary {
    fn new(credential: usize, assigned: usize) -> Self {
        Self {
            credential,
            assigned,
            enriched: 0,
            failed: 0,
            untouched: 0,
            stopped: None,
        }
    }

    /// Items that produced a terminal record
    pub fn consumed(&self) -> usize {
        self.enriched + self.failed
    }
}

/// Drains one partition; shares only the quota tracker and the result sink
pub struct EnrichmentWorker {
    credential: Credential,
    quota: Arc<QuotaTracker>,
    lookup: Arc<dyn LookupClient>,
    sink: ResultSink,
}

impl EnrichmentWorker {
    pub fn new(
        credential: Credential,
        quota: Arc<QuotaTracker>,
        lookup: Arc<dyn LookupClient>,
        sink: ResultSink,
    ) -> Self {
        Self {
            credential,
            quota,
            lookup,
            sink,
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Process `items` in order until the slice is done or the quota stops us
    pub async fn run(&self, items: Vec<WorkItem>) -> PartitionSummary {
        let credential = self.credential.index();
        let mut summary = PartitionSummary::new(credential, items.len());

        for (position, item) in items.iter().enumerate() {
            let key = match isbn::normalize(item.external_key.as_deref()) {
                Ok(key) => key,
                Err(e) => {
                    debug!(job_id = item.job_id, error = %e, "Skipping lookup for bad key");
                    let record = FailureRecord::new(item, FailureKind::Validation, e.to_string());
                    self.fail(&mut summary, record);
                    continue;
                }
            };

            if !self.quota.try_acquire(credential) {
                let reason = if self.quota.is_exhausted() {
                    StopReason::GloballyExhausted
                } else {
                    StopReason::QuotaSpent
                };
                summary.untouched = items.len() - position;
                summary.stopped = Some(reason);
                info!(
                    credential,
                    untouched = summary.untouched,
                    reason = ?reason,
                    "Quota unavailable, stopping partition"
                );
                break;
            }

            match self.lookup.lookup(&key, &self.credential).await {
                LookupOutcome::Found(payload) => {
                    debug!(job_id = item.job_id, key = %key, "Lookup found");
                    summary.enriched += 1;
                    self.sink
                        .record_success(EnrichedRecord::from_payload(item, payload));
                }
                LookupOutcome::NotFound => {
                    debug!(job_id = item.job_id, key = %key, "Lookup returned no data");
                    self.fail(&mut summary, FailureRecord::not_found(item));
                }
                LookupOutcome::RateLimited => {
                    if self.quota.mark_exhausted() {
                        warn!(
                            credential,
                            job_id = item.job_id,
                            "Upstream quota violation, stopping all credentials for this run"
                        );
                    }
                    self.fail(&mut summary, FailureRecord::quota_exhausted(item));
                    summary.untouched = items.len() - position - 1;
                    summary.stopped = Some(StopReason::UpstreamRateLimited);
                    break;
                }
                LookupOutcome::NetworkError(detail) => {
                    warn!(
                        job_id = item.job_id,
                        key = %key,
                        error = %detail,
                        "Lookup network error"
                    );
                    self.fail(&mut summary, FailureRecord::network(item, &detail));
                }
                LookupOutcome::UnknownError(detail) => {
                    warn!(
                        job_id = item.job_id,
                        key = %key,
                        error = %detail,
                        "Unexpected lookup response"
                    );
                    self.fail(&mut summary, FailureRecord::defect(item, &detail));
                }
            }
        }

        summary
    }

    fn fail(&self, summary: &mut PartitionSummary, record: FailureRecord) {
        summary.failed += 1;
        self.sink.record_failure(record);
    }
}
