use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single object-store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Storage error: {0}")]
    Other(String),
}

impl StoreError {
    /// Only connectivity failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Maps an SDK failure onto the store taxonomy using the service error code,
/// falling back to the HTTP status.
pub(crate) fn classify_sdk_error<E>(key: &str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{}: {}", key, DisplayErrorContext(&err));
    match &err {
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            match (ctx.err().code(), status) {
                (Some("NoSuchKey" | "NotFound" | "NoSuchBucket"), _) | (_, 404) => {
                    StoreError::NotFound(message)
                }
                (Some("AccessDenied" | "Forbidden" | "InvalidAccessKeyId"), _) | (_, 403) => {
                    StoreError::AccessDenied(message)
                }
                (Some("QuotaExceeded" | "ServiceQuotaExceeded" | "SlowDown"), _) => {
                    StoreError::QuotaExceeded(message)
                }
                (_, 500..=599) => StoreError::Connection(message),
                _ => StoreError::Other(message),
            }
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Connection(message)
        }
        _ => StoreError::Other(message),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let res = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(|e| classify_sdk_error(prefix, e))?;

            if let Some(contents) = res.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(key);
                    }
                }
            }

            if res.is_truncated.unwrap_or(false) {
                continuation_token = res.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(key, e))?;

        let data = res
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Connection(format!("{}: {}", key, e)))?;
        Ok(data.into_bytes())
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        let res = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await;

        if let Err(e) = res {
            tracing::error!(
                "S3 put_object failed: bucket={}, key={}, error={}",
                self.bucket,
                key,
                DisplayErrorContext(&e)
            );
            return Err(classify_sdk_error(key, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => match classify_sdk_error(key, e) {
                StoreError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}

/// A recorded call against `MemoryObjectStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    List(String),
    Get(String),
    Put(String),
    Delete(String),
    Exists(String),
}

/// In-process store used by tests and local runs.
///
/// Records every call in order and supports injected failures so callers can
/// check which operations were (or were not) attempted.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Bytes>,
    content_types: DashMap<String, String>,
    put_failures: DashMap<String, StoreError>,
    get_failures: DashMap<String, StoreError>,
    delete_failures: DashMap<String, StoreError>,
    /// Remaining number of `Connection` failures to return from `get` per key.
    transient_get_failures: DashMap<String, usize>,
    list_failure: Mutex<Option<StoreError>>,
    get_latency: Mutex<Option<Duration>>,
    ops: Mutex<Vec<StoreOp>>,
    put_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.insert(key.into(), data.into());
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.get(key).map(|v| v.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.content_types.get(key).map(|v| v.value().clone())
    }

    pub fn fail_put(&self, key: impl Into<String>, err: StoreError) {
        self.put_failures.insert(key.into(), err);
    }

    pub fn fail_get(&self, key: impl Into<String>, err: StoreError) {
        self.get_failures.insert(key.into(), err);
    }

    pub fn fail_delete(&self, key: impl Into<String>, err: StoreError) {
        self.delete_failures.insert(key.into(), err);
    }

    /// The next `times` calls to `get(key)` fail with a connection error.
    pub fn fail_get_transiently(&self, key: impl Into<String>, times: usize) {
        self.transient_get_failures.insert(key.into(), times);
    }

    pub fn fail_list(&self, err: StoreError) {
        if let Ok(mut slot) = self.list_failure.lock() {
            *slot = Some(err);
        }
    }

    pub fn set_get_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.get_latency.lock() {
            *slot = Some(latency);
        }
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    fn record(&self, op: StoreOp) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.record(StoreOp::List(prefix.to_string()));
        if let Some(err) = self.list_failure.lock().ok().and_then(|slot| slot.clone()) {
            return Err(err);
        }
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.record(StoreOp::Get(key.to_string()));
        let latency = self.get_latency.lock().ok().and_then(|slot| *slot);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.get_failures.get(key) {
            return Err(err.value().clone());
        }
        if let Some(mut remaining) = self.transient_get_failures.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Connection(format!("{}: connection reset", key)));
        }
        self.object(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.record(StoreOp::Put(key.to_string()));
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.put_failures.get(key) {
            return Err(err.value().clone());
        }
        self.objects.insert(key.to_string(), data);
        self.content_types
            .insert(key.to_string(), content_type.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record(StoreOp::Delete(key.to_string()));
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.delete_failures.get(key) {
            return Err(err.value().clone());
        }
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.record(StoreOp::Exists(key.to_string()));
        Ok(self.objects.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_list_filters_by_prefix() {
        let store = MemoryObjectStore::new();
        store.insert("images/b.png", vec![1u8]);
        store.insert("images/a.jpg", vec![2u8]);
        store.insert("other/c.jpg", vec![3u8]);

        let keys = store.list("images/").await.unwrap();
        assert_eq!(keys, vec!["images/a.jpg", "images/b.png"]);
    }

    #[tokio::test]
    async fn test_memory_store_injected_failures() {
        let store = MemoryObjectStore::new();
        store.insert("a.jpg", vec![1u8]);
        store.fail_put("a.webp", StoreError::QuotaExceeded("full".into()));
        store.fail_get_transiently("a.jpg", 1);

        let first = store.get("a.jpg").await;
        assert!(matches!(first, Err(StoreError::Connection(_))));
        assert!(store.get("a.jpg").await.is_ok());

        let put = store.put("a.webp", Bytes::from_static(b"x"), "image/webp").await;
        assert!(matches!(put, Err(StoreError::QuotaExceeded(_))));
        assert_eq!(store.put_calls(), 1);
        assert!(!store.contains("a.webp"));
    }

    #[test]
    fn test_only_connection_errors_are_transient() {
        assert!(StoreError::Connection("reset".into()).is_transient());
        assert!(!StoreError::NotFound("k".into()).is_transient());
        assert!(!StoreError::AccessDenied("k".into()).is_transient());
        assert!(!StoreError::QuotaExceeded("k".into()).is_transient());
    }
}
