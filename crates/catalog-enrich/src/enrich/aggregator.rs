//! Concurrent sink for worker results
//!
//! Workers append through cheap cloned [`ResultSink`] handles backed by unbounded
//! channels, so recording an outcome never blocks and never takes a lock. The collected
//! records are only read once, in [`ResultAggregator::finish`], after every worker joined.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::models::{EnrichedRecord, FailureRecord};

/// Append-only handle given to each worker
#[derive(Debug, Clone)]
pub struct ResultSink {
    enriched: UnboundedSender<EnrichedRecord>,
    failed: UnboundedSender<FailureRecord>,
}

impl ResultSink {
    pub fn record_success(&self, record: EnrichedRecord) {
        // The receiver lives in the aggregator, which outlives every worker.
        let _ = self.enriched.send(record);
    }

    pub fn record_failure(&self, record: FailureRecord) {
        let _ = self.failed.send(record);
    }
}

/// Everything the workers of one run produced, in no particular cross-partition order
#[derive(Debug, Default, Clone)]
pub struct EnrichmentResults {
    pub enriched: Vec<EnrichedRecord>,
    pub failed: Vec<FailureRecord>,
}

impl EnrichmentResults {
    pub fn len(&self) -> usize {
        self.enriched.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retryable_failures(&self) -> usize {
        self.failed.iter().filter(|f| f.retryable).count()
    }
}

/// Owner of the receiving side of the result channels
#[derive(Debug)]
pub struct ResultAggregator {
    sink: ResultSink,
    enriched_rx: UnboundedReceiver<EnrichedRecord>,
    failed_rx: UnboundedReceiver<FailureRecord>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        let (enriched, enriched_rx) = unbounded_channel();
        let (failed, failed_rx) = unbounded_channel();

        Self {
            sink: ResultSink { enriched, failed },
            enriched_rx,
            failed_rx,
        }
    }

    /// New handle for a worker
    pub fn sink(&self) -> ResultSink {
        self.sink.clone()
    }

    /// Drain everything recorded so far
    ///
    /// Call only after all workers have been joined; records sent after this point are lost.
    pub fn finish(mut self) -> EnrichmentResults {
        drop(self.sink);

        let mut results = EnrichmentResults::default();
        while let Ok(record) = self.enriched_rx.try_recv() {
            results.enriched.push(record);
        }
        while let Ok(record) = self.failed_rx.try_recv() {
            results.failed.push(record);
        }

        results
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::models::{BookPayload, WorkItem};

    fn item(n: i64) -> WorkItem {
        WorkItem {
            record_id: n,
            external_key: None,
            job_id: n + 1000,
        }
    }

    #[test]
    fn test_finish_collects_both_kinds() {
        let aggregator = ResultAggregator::new();
        let sink = aggregator.sink();

        sink.record_success(EnrichedRecord::from_payload(&item(1), BookPayload::default()));
        sink.record_failure(FailureRecord::not_found(&item(2)));
        sink.record_failure(FailureRecord::network(&item(3), "reset"));

        let results = aggregator.finish();
        assert_eq!(results.enriched.len(), 1);
        assert_eq!(results.failed.len(), 2);
        assert_eq!(results.len(), 3);
        assert_eq!(results.retryable_failures(), 1);
    }

    #[test]
    fn test_sink_survives_aggregator_drop() {
        let aggregator = ResultAggregator::new();
        let sink = aggregator.sink();
        drop(aggregator);

        // Sending into a closed channel is silently ignored
        sink.record_failure(FailureRecord::not_found(&item(1)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let aggregator = ResultAggregator::new();

        let mut handles = Vec::new();
        for worker in 0..8i64 {
            let sink = aggregator.sink();
            handles.push(tokio::spawn(async move {
                for n in 0..50 {
                    let item = item(worker * 100 + n);
                    if n % 2 == 0 {
                        sink.record_success(EnrichedRecord::from_payload(
                            &item,
                            BookPayload::default(),
                        ));
                    } else {
                        sink.record_failure(FailureRecord::not_found(&item));
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let results = aggregator.finish();
        assert_eq!(results.enriched.len(), 200);
        assert_eq!(results.failed.len(), 200);
    }
}
