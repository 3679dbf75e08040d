use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ConverterConfig;
use crate::error::{ErrorKind, ItemError};
use crate::models::{ConversionResult, ConversionTask, SkipReason};
use crate::services::storage::{ObjectStore, StoreError};
use crate::services::transcoder::{ImageTranscoder, TranscodeError};
use crate::utils::retry::{RetryPolicy, retry_async};

const WEBP_CONTENT_TYPE: &str = "image/webp";

/// Where a task ended up before the optional delete step.
enum Staged {
    Stored { original_size: u64, webp_size: u64 },
    AlreadyExists,
}

/// Drives a single object through existence check, fetch, transcode, store
/// and optional delete. Every failure is folded into the returned result.
pub struct ConversionUnit {
    store: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn ImageTranscoder>,
    retry: RetryPolicy,
    timeout: Duration,
    skip_existing: bool,
}

impl ConversionUnit {
    pub fn new(store: Arc<dyn ObjectStore>, transcoder: Arc<dyn ImageTranscoder>) -> Self {
        Self {
            store,
            transcoder,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(300),
            skip_existing: true,
        }
    }

    pub fn from_config(
        config: &ConverterConfig,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn ImageTranscoder>,
    ) -> Self {
        Self::new(store, transcoder)
            .with_timeout(config.task_timeout)
            .with_retry_policy(RetryPolicy::new(config.max_retries))
            .with_skip_existing(config.skip_existing)
    }

    /// Caps existence check, fetch, transcode and store for one task.
    ///
    /// A blocking codec job cannot be interrupted: on timeout the task is
    /// reported as failed and its worker moves on, but the encode keeps its
    /// blocking thread until it finishes. Repeated timeouts can therefore
    /// leave more than `max_workers` codec jobs running at once.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub async fn execute(&self, task: &ConversionTask) -> ConversionResult {
        if task.dry_run {
            debug!(
                "Dry run: would convert {} -> {}",
                task.source_key, task.destination_key
            );
            return ConversionResult::previewed(task);
        }

        let started = Instant::now();
        let staged = match tokio::time::timeout(self.timeout, self.convert(task)).await {
            Ok(Ok(staged)) => staged,
            Ok(Err(err)) => {
                warn!(source = %task.source_key, kind = %err.kind, "Failed to convert: {}", err.message);
                return ConversionResult::failed(task, err, elapsed_millis(started));
            }
            Err(_) => {
                warn!(source = %task.source_key, "Conversion timed out after {:?}", self.timeout);
                let err = ItemError::new(
                    ErrorKind::Timeout,
                    format!("conversion did not finish within {:?}", self.timeout),
                );
                return ConversionResult::failed(task, err, elapsed_millis(started));
            }
        };

        let (original_size, webp_size) = match staged {
            Staged::AlreadyExists => {
                info!("WebP already exists, skipping: {}", task.destination_key);
                return ConversionResult::skipped(
                    task,
                    SkipReason::AlreadyExists,
                    elapsed_millis(started),
                );
            }
            Staged::Stored {
                original_size,
                webp_size,
            } => (original_size, webp_size),
        };

        // The WebP copy is durable at this point; only now may the source go.
        let warning = if task.delete_original {
            match self.store.delete(&task.source_key).await {
                Ok(()) => {
                    info!("🗑️  Deleted original file: {}", task.source_key);
                    None
                }
                Err(e) => {
                    warn!(source = %task.source_key, "Converted but could not delete original: {}", e);
                    Some(format!("original not deleted: {}", e))
                }
            }
        } else {
            None
        };

        let result =
            ConversionResult::converted(task, original_size, webp_size, elapsed_millis(started));
        info!(
            "Converted {} -> {} ({} -> {} bytes, {:.1}% compression)",
            task.source_key,
            task.destination_key,
            original_size,
            webp_size,
            result.compression_ratio.unwrap_or(0.0)
        );

        match warning {
            Some(w) => result.with_warning(w),
            None => result,
        }
    }

    async fn convert(&self, task: &ConversionTask) -> Result<Staged, ItemError> {
        if self.skip_existing {
            match self.store.exists(&task.destination_key).await {
                Ok(true) => return Ok(Staged::AlreadyExists),
                Ok(false) => {}
                Err(e) => debug!(
                    "Existence check failed for {}, converting anyway: {}",
                    task.destination_key, e
                ),
            }
        }

        let source = retry_async(
            &self.retry,
            &format!("fetch {}", task.source_key),
            StoreError::is_transient,
            || self.store.get(&task.source_key),
        )
        .await
        .map_err(|e| ItemError::new(ErrorKind::SourceFetchError, e.to_string()))?;
        let original_size = source.len() as u64;

        let transcoder = self.transcoder.clone();
        let quality = task.quality;
        let transcoded = tokio::task::spawn_blocking(move || transcoder.transcode(&source, quality))
            .await
            .map_err(|e| {
                ItemError::new(ErrorKind::TranscodeError, format!("transcoder aborted: {}", e))
            })?
            .map_err(|e| {
                let kind = match e {
                    TranscodeError::Decode(_) | TranscodeError::Unsupported(_) => {
                        ErrorKind::UnsupportedOrCorruptImage
                    }
                    TranscodeError::Encode(_) => ErrorKind::TranscodeError,
                };
                ItemError::new(kind, e.to_string())
            })?;
        debug!(
            "Decoded {} as {} {}x{} (alpha: {})",
            task.source_key,
            transcoded.source.format,
            transcoded.source.width,
            transcoded.source.height,
            transcoded.source.has_alpha
        );

        let webp_size = transcoded.data.len() as u64;
        let data = Bytes::from(transcoded.data);
        retry_async(
            &self.retry,
            &format!("store {}", task.destination_key),
            StoreError::is_transient,
            || self.store.put(&task.destination_key, data.clone(), WEBP_CONTENT_TYPE),
        )
        .await
        .map_err(|e| ItemError::new(ErrorKind::DestinationStoreError, e.to_string()))?;

        Ok(Staged::Stored {
            original_size,
            webp_size,
        })
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
