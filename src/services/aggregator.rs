use tokio::sync::Mutex;

use crate::models::{BatchStats, ConversionOutcome, ConversionResult};

/// Collects per-item results into running statistics.
///
/// All counters live behind one lock so a snapshot never observes a
/// half-applied `record`.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    stats: Mutex<BatchStats>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, result: &ConversionResult) {
        let mut stats = self.stats.lock().await;
        stats.attempted += 1;
        match result.outcome {
            ConversionOutcome::Converted => {
                stats.successful += 1;
                stats.total_original_bytes += result.original_size_bytes;
                stats.total_webp_bytes += result.webp_size_bytes;
            }
            ConversionOutcome::Previewed => stats.successful += 1,
            ConversionOutcome::Skipped(_) => stats.skipped += 1,
            ConversionOutcome::Failed => stats.failed += 1,
        }
    }

    pub async fn snapshot(&self) -> BatchStats {
        *self.stats.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ItemError};
    use crate::models::{ConversionTask, SkipReason};
    use std::sync::Arc;

    fn task(n: usize) -> ConversionTask {
        ConversionTask {
            source_key: format!("img/{}.png", n),
            destination_key: format!("webp/{}.webp", n),
            quality: 100,
            delete_original: false,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn test_counts_each_outcome() {
        let aggregator = ResultAggregator::new();
        aggregator
            .record(&ConversionResult::converted(&task(0), 1000, 400, 3))
            .await;
        aggregator
            .record(&ConversionResult::previewed(&task(1)))
            .await;
        aggregator
            .record(&ConversionResult::skipped(&task(2), SkipReason::AlreadyExists, 1))
            .await;
        aggregator
            .record(&ConversionResult::failed(
                &task(3),
                ItemError::new(ErrorKind::TranscodeError, "bad"),
                2,
            ))
            .await;

        let stats = aggregator.snapshot().await;
        assert_eq!(stats.attempted, 4);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_original_bytes, 1000);
        assert_eq!(stats.total_webp_bytes, 400);
        assert_eq!(stats.compression_ratio(), Some(60.0));
        assert_eq!(stats.saved_bytes(), 600);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let aggregator = Arc::new(ResultAggregator::new());
        let mut handles = Vec::new();

        for n in 0..64 {
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                let result = if n % 4 == 0 {
                    ConversionResult::failed(
                        &task(n),
                        ItemError::new(ErrorKind::SourceFetchError, "gone"),
                        1,
                    )
                } else {
                    ConversionResult::converted(&task(n), 10, 5, 1)
                };
                aggregator.record(&result).await;
                let snap = aggregator.snapshot().await;
                assert_eq!(snap.attempted, snap.successful + snap.failed + snap.skipped);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = aggregator.snapshot().await;
        assert_eq!(stats.attempted, 64);
        assert_eq!(stats.failed, 16);
        assert_eq!(stats.successful, 48);
        assert_eq!(stats.total_original_bytes, 480);
        assert_eq!(stats.total_webp_bytes, 240);
    }
}
