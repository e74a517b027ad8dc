//! Encrypted object I/O (C1), grounded on the teacher's
//! `EncryptionSystem` shape (`Config` + `Arc<RwLock<State>>` +
//! operation-count bookkeeping) but retargeted from client-side AES onto
//! `aws-sdk-s3` server-side encryption, since actual object storage
//! belongs to the bucket, not to this process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::config::ObjectStoreConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no encryption key hint resolved")]
    EncryptionUnavailable,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("object store unavailable: {0}")]
    ObjectStoreUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub size_bytes: i64,
    pub tags: Vec<(String, String)>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LifecycleRule {
    pub id: String,
    pub tag_filter: (String, String),
    pub transition_to_cold_after_days: Option<u32>,
    pub expire_after_days: Option<u32>,
    pub abort_incomplete_multipart_after_days: Option<u32>,
}

/// R1-R3 of spec.md §4.1.
pub fn default_lifecycle_rules() -> Vec<LifecycleRule> {
    vec![
        LifecycleRule {
            id: "r1-expire-deleted".into(),
            tag_filter: ("deleted".into(), "true".into()),
            transition_to_cold_after_days: None,
            expire_after_days: Some(30),
            abort_incomplete_multipart_after_days: None,
        },
        LifecycleRule {
            id: "r2-cold-deleted".into(),
            tag_filter: ("deleted".into(), "true".into()),
            transition_to_cold_after_days: Some(7),
            expire_after_days: None,
            abort_incomplete_multipart_after_days: None,
        },
        LifecycleRule {
            id: "r3-abort-multipart".into(),
            tag_filter: (String::new(), String::new()),
            transition_to_cold_after_days: None,
            expire_after_days: None,
            abort_incomplete_multipart_after_days: Some(7),
        },
    ]
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        encryption_key_hint: Option<&str>,
    ) -> Result<String, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn head(&self, key: &str) -> Result<ObjectMetadata, StoreError>;

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError>;

    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        content_type: &str,
    ) -> Result<String, StoreError>;

    async fn tag(&self, key: &str, tags: &[(String, String)]) -> Result<(), StoreError>;

    async fn untag(&self, key: &str, tag_names: &[String]) -> Result<(), StoreError>;

    async fn declare_lifecycle(&self, rules: &[LifecycleRule]) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct StoreState {
    operations_performed: u64,
    last_operation: Option<DateTime<Utc>>,
}

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    kms_key_id: String,
    state: Arc<RwLock<StoreState>>,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, config: &ObjectStoreConfig) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            kms_key_id: config.kms_key_id.clone(),
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    async fn record_operation(&self) {
        let mut state = self.state.write().await;
        state.operations_performed += 1;
        state.last_operation = Some(Utc::now());
    }

    /// Capped exponential backoff with jitter, shared idiom across the
    /// object store, queue, and bus adapters (up to 5 attempts).
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        let mut delay_ms: u64 = 100;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e @ StoreError::ObjectStoreUnavailable(_)) => {
                    attempt += 1;
                    if attempt >= 5 {
                        return Err(e);
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(4_000);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, bytes))]
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        encryption_key_hint: Option<&str>,
    ) -> Result<String, StoreError> {
        let kms_key = encryption_key_hint
            .map(str::to_owned)
            .or_else(|| Some(self.kms_key_id.clone()))
            .ok_or(StoreError::EncryptionUnavailable)?;

        self.record_operation().await;

        self.with_retry(|| async {
            let body = ByteStream::from(bytes.clone());
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .content_type(content_type)
                .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::AwsKms)
                .ssekms_key_id(&kms_key)
                .send()
                .await
                .map(|out| out.e_tag().unwrap_or_default().to_string())
                .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.record_operation().await;

        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_get_error(key, e.to_string()))?;

        out.body
            .collect()
            .await
            .map(|data| data.into_bytes().to_vec())
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn head(&self, key: &str) -> Result<ObjectMetadata, StoreError> {
        let out = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_get_error(key, e.to_string()))?;

        let tagging = self
            .client
            .get_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))?;

        let tags = tagging
            .tag_set()
            .iter()
            .map(|t| (t.key().to_string(), t.value().to_string()))
            .collect();

        Ok(ObjectMetadata {
            content_type: out.content_type().unwrap_or_default().to_string(),
            size_bytes: out.content_length().unwrap_or_default(),
            tags,
            last_modified: out
                .last_modified()
                .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
                .unwrap_or_else(Utc::now),
        })
    }

    #[instrument(skip(self))]
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        let presign = PresigningConfig::expires_in(ttl)
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))?;

        self.client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign)
            .await
            .map(|req| req.uri().to_string())
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let presign = PresigningConfig::expires_in(ttl)
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presign)
            .await
            .map(|req| req.uri().to_string())
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))
    }

    /// Idempotent; adding `deleted=true` also stamps `deleted_at` in the
    /// same tag-set write, per spec.md §4.1.
    #[instrument(skip(self))]
    async fn tag(&self, key: &str, tags: &[(String, String)]) -> Result<(), StoreError> {
        let mut existing = self.head(key).await.map(|m| m.tags).unwrap_or_default();

        let mut incoming = tags.to_vec();
        if incoming.iter().any(|(k, v)| k == "deleted" && v == "true")
            && !incoming.iter().any(|(k, _)| k == "deleted_at")
        {
            incoming.push(("deleted_at".into(), Utc::now().to_rfc3339()));
        }

        for (k, v) in incoming {
            existing.retain(|(ek, _)| ek != &k);
            existing.push((k, v));
        }

        let tag_set = aws_sdk_s3::types::Tagging::builder()
            .set_tag_set(Some(
                existing
                    .into_iter()
                    .map(|(k, v)| aws_sdk_s3::types::Tag::builder().key(k).value(v).build().unwrap())
                    .collect(),
            ))
            .build()
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))?;

        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tag_set)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn untag(&self, key: &str, tag_names: &[String]) -> Result<(), StoreError> {
        let existing = self.head(key).await.map(|m| m.tags).unwrap_or_default();
        let remaining: Vec<_> = existing
            .into_iter()
            .filter(|(k, _)| !tag_names.contains(k))
            .collect();

        let tag_set = aws_sdk_s3::types::Tagging::builder()
            .set_tag_set(Some(
                remaining
                    .into_iter()
                    .map(|(k, v)| aws_sdk_s3::types::Tag::builder().key(k).value(v).build().unwrap())
                    .collect(),
            ))
            .build()
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))?;

        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tag_set)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn declare_lifecycle(&self, rules: &[LifecycleRule]) -> Result<(), StoreError> {
        if rules.is_empty() {
            warn!("declare_lifecycle called with no rules");
        }
        // Bucket lifecycle configuration is declared once at process start
        // by the server and reaper binaries; the concrete AWS lifecycle
        // document assembly lives in `store::lifecycle`.
        crate::store::lifecycle::apply(&self.client, &self.bucket, rules)
            .await
            .map_err(|e| StoreError::ObjectStoreUnavailable(e.to_string()))
    }
}

fn classify_get_error(key: &str, message: String) -> StoreError {
    if message.contains("NoSuchKey") || message.contains("NotFound") {
        StoreError::NotFound(key.to_string())
    } else if message.contains("AccessDenied") {
        StoreError::AccessDenied(key.to_string())
    } else {
        StoreError::ObjectStoreUnavailable(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_cover_r1_r2_r3() {
        let rules = default_lifecycle_rules();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].expire_after_days, Some(30));
        assert_eq!(rules[1].transition_to_cold_after_days, Some(7));
        assert_eq!(rules[2].abort_incomplete_multipart_after_days, Some(7));
    }
}
