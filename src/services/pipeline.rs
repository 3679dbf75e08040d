use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::ConverterConfig;
use crate::error::ConverterError;
use crate::models::{ConversionReport, ConversionTask};
use crate::services::aggregator::ResultAggregator;
use crate::services::conversion::ConversionUnit;
use crate::services::scheduler::{BatchProgress, BatchScheduler};
use crate::services::storage::ObjectStore;
use crate::services::transcoder::ImageTranscoder;
use crate::utils::keys::{destination_key, is_supported_image};

/// Top-level entry point: discovery, scheduling and aggregation.
pub struct Pipeline {
    config: Arc<ConverterConfig>,
    store: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn ImageTranscoder>,
    shutdown: Option<watch::Receiver<bool>>,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl Pipeline {
    /// Validates the configuration up front; nothing is dispatched on error.
    pub fn new(
        config: ConverterConfig,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn ImageTranscoder>,
    ) -> Result<Self, ConverterError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            store,
            transcoder,
            shutdown: None,
            progress: None,
        })
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Direct store access for callers that bypass the batch pipeline.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Direct codec access for callers that bypass the batch pipeline.
    pub fn transcoder(&self) -> &Arc<dyn ImageTranscoder> {
        &self.transcoder
    }

    /// Lists the source prefix and keeps keys with a supported image extension.
    pub async fn discover_keys(&self) -> Result<Vec<String>, ConverterError> {
        let prefix = &self.config.source_prefix;
        let objects = self
            .store
            .list(prefix)
            .await
            .map_err(|source| ConverterError::Discovery {
                prefix: prefix.clone(),
                source,
            })?;

        let keys: Vec<String> = objects
            .into_iter()
            .filter(|key| is_supported_image(key))
            .collect();
        info!("🔎 Found {} image files under '{}'", keys.len(), prefix);
        Ok(keys)
    }

    pub fn destination_key(&self, source_key: &str) -> String {
        destination_key(
            source_key,
            &self.config.source_prefix,
            &self.config.destination_prefix,
        )
    }

    pub fn build_tasks(&self, keys: Vec<String>) -> Vec<ConversionTask> {
        let quality = self.config.webp_quality();
        keys.into_iter()
            .map(|source_key| ConversionTask {
                destination_key: self.destination_key(&source_key),
                source_key,
                quality,
                delete_original: self.config.delete_original,
                dry_run: self.config.dry_run,
            })
            .collect()
    }

    /// Converts the given keys, or everything discovered under the source
    /// prefix when `explicit_keys` is `None`.
    pub async fn convert_images(
        &self,
        explicit_keys: Option<Vec<String>>,
    ) -> Result<ConversionReport, ConverterError> {
        let started_at = Utc::now();
        let keys = match explicit_keys {
            Some(keys) => keys,
            None => self.discover_keys().await?,
        };

        if keys.is_empty() {
            warn!("No images found to convert");
        }

        let tasks = self.build_tasks(keys);
        if self.config.dry_run {
            info!("🧪 DRY RUN - {} images would be converted, nothing will be written", tasks.len());
        } else {
            info!(
                "Starting conversion of {} images with {} workers",
                tasks.len(),
                self.config.max_workers
            );
        }

        let unit = ConversionUnit::from_config(
            &self.config,
            self.store.clone(),
            self.transcoder.clone(),
        );
        let aggregator = Arc::new(ResultAggregator::new());
        let mut scheduler = BatchScheduler::new(Arc::new(unit), aggregator.clone());
        if let Some(shutdown) = &self.shutdown {
            scheduler = scheduler.with_shutdown(shutdown.clone());
        }
        if let Some(progress) = &self.progress {
            scheduler = scheduler.with_progress(progress.clone());
        }

        let results = scheduler
            .run(tasks, self.config.max_workers, self.config.batch_size)
            .await;
        let stats = aggregator.snapshot().await;

        let report = ConversionReport {
            stats,
            results,
            dry_run: self.config.dry_run,
            started_at,
            finished_at: Utc::now(),
        };

        info!("{}", "=".repeat(60));
        info!("CONVERSION COMPLETED");
        info!(
            "Attempted: {} | Successful: {} | Failed: {} | Skipped: {}",
            stats.attempted, stats.successful, stats.failed, stats.skipped
        );
        if let Some(ratio) = stats.compression_ratio() {
            info!(
                "Size: {} -> {} bytes ({:.1}% reduction)",
                stats.total_original_bytes, stats.total_webp_bytes, ratio
            );
        }
        info!("Duration: {:.2} seconds", report.duration_secs());
        info!("{}", "=".repeat(60));

        Ok(report)
    }
}
