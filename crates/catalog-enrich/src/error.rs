//! Pipeline error type

use thiserror::Error;

use crate::enrich::store::StoreError;

/// Errors that stop an enrichment run
///
/// Per-item lookup problems never show up here; they become failure records.
#[derive(Error, Debug)]
pub enum EnrichError {
    /// Reading the pending queue failed
    #[error("Failed to load pending jobs: {0}")]
    Store(#[from] StoreError),

    /// A persistence sub-batch ran out of retries
    #[error("{operation} failed on chunk {chunk} after {attempts} attempt(s): {source}")]
    Persist {
        operation: &'static str,
        chunk: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

pub type Result<T> = std::result::Result<T, EnrichError>;
