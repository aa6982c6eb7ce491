//! Book enrichment pipeline
//!
//! Components, leaf to root:
//!
//! - [`quota`]: per-credential call budgets plus the run-wide exhausted flag
//! - [`partition`]: order-preserving split of the pending queue
//! - [`lookup`]: the upstream lookup seam and its HTTP implementation
//! - [`worker`]: drains one partition with one credential
//! - [`aggregator`]: lock-free sink for worker results
//! - [`persistence`]: dependency-ordered idempotent bulk writer, over [`store`] and [`batch`]
//! - [`orchestrator`]: the `LoadPending -> Dispatch -> Persist -> Done` state machine

pub mod aggregator;
pub mod batch;
pub mod isbn;
pub mod lookup;
pub mod memory_store;
pub mod models;
pub mod orchestrator;
pub mod partition;
pub mod persistence;
pub mod pg_store;
pub mod quota;
pub mod store;
pub mod worker;

pub use aggregator::{EnrichmentResults, ResultAggregator, ResultSink};
pub use batch::{BatchExecutor, RetryPolicy};
pub use lookup::{HttpLookupClient, HttpLookupConfig, LookupClient};
pub use memory_store::InMemoryCatalogStore;
pub use models::{
    AuthorCredit, BookPayload, EnrichedRecord, FailureKind, FailureRecord, JobCounts, JobStatus,
    LookupOutcome, WorkItem,
};
pub use orchestrator::{EnrichmentOrchestrator, PipelineState, RunReport};
pub use persistence::{BulkPersistence, PersistReport};
pub use pg_store::PgCatalogStore;
pub use quota::{Credential, QuotaTracker};
pub use store::{CatalogStore, ImageRow, JobFailure, LinkRow, NameKind, StoreError};
pub use worker::{EnrichmentWorker, PartitionSummary, StopReason};
