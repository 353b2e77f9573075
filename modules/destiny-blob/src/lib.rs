//! Blob Gateway: scoped upload/download of blob storage objects via
//! pre-signed URLs, plus a streaming JSONL reader/writer for the import and
//! enhancement-result formats.
//!
//! Grounded in the `aws-sdk-s3` client-construction and key-scoping style of
//! `S3RunpackStore`, adapted from tar archives under tenant/namespace/run
//! prefixes to DESTINY's content-addressed `refs/{id}/...` and
//! `batches/{id}/...` prefixes.

mod jsonl;

pub use jsonl::{JsonlLine, JsonlReader};

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use destiny_common::{DestinyError, Result};
use uuid::Uuid;

/// A scoped key under one of the two content-addressed prefixes.
#[derive(Debug, Clone)]
pub enum BlobKey {
    /// `refs/{reference_id}/{name}` — per-reference artifacts (none today,
    /// reserved for future robot-attached blobs).
    Reference { reference_id: Uuid, name: String },
    /// `batches/{batch_id}/{name}` — import payloads and enhancement
    /// request/result/report JSONL files.
    Batch { batch_id: Uuid, name: String },
}

impl BlobKey {
    fn as_object_key(&self) -> String {
        match self {
            BlobKey::Reference { reference_id, name } => format!("refs/{reference_id}/{name}"),
            BlobKey::Batch { batch_id, name } => format!("batches/{batch_id}/{name}"),
        }
    }
}

#[derive(Clone)]
pub struct BlobGateway {
    client: Client,
    bucket: String,
    presign_ttl: Duration,
}

impl BlobGateway {
    pub async fn new(bucket: String, region: String, presign_ttl_secs: u64) -> Result<Self> {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;
        let client = Client::new(&shared_config);
        Ok(Self {
            client,
            bucket,
            presign_ttl: Duration::from_secs(presign_ttl_secs),
        })
    }

    /// Returns a pre-signed PUT URL valid for the gateway's configured TTL.
    pub async fn presigned_upload_url(&self, key: &BlobKey) -> Result<String> {
        let presign_config = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| DestinyError::BlobUnavailable(format!("presign config: {e}")))?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_object_key())
            .presigned(presign_config)
            .await
            .map_err(|e| DestinyError::BlobUnavailable(format!("presign put: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    /// Returns a pre-signed GET URL valid for the gateway's configured TTL.
    pub async fn presigned_download_url(&self, key: &BlobKey) -> Result<String> {
        let presign_config = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| DestinyError::BlobUnavailable(format!("presign config: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_object_key())
            .presigned(presign_config)
            .await
            .map_err(|e| DestinyError::BlobUnavailable(format!("presign get: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    /// Writes `body` directly (used for internally-generated JSONL payloads
    /// and the text validation report; robots upload via the pre-signed URL
    /// instead of calling this).
    pub async fn put(&self, key: &BlobKey, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_object_key())
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| DestinyError::BlobUnavailable(format!("put {}: {e}", key.as_object_key())))?;
        Ok(())
    }

    pub async fn get(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_object_key())
            .send()
            .await
            .map_err(|e| DestinyError::BlobUnavailable(format!("get {}: {e}", key.as_object_key())))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| DestinyError::BlobUnavailable(format!("read body: {e}")))?;
        Ok(bytes.into_bytes().to_vec())
    }

    /// Opens a lazy, line-at-a-time reader over a stored JSONL object. Never
    /// buffers the whole object in memory (import files can be large).
    pub async fn open_jsonl(&self, key: &BlobKey) -> Result<JsonlReader> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_object_key())
            .send()
            .await
            .map_err(|e| DestinyError::BlobUnavailable(format!("get {}: {e}", key.as_object_key())))?;
        Ok(JsonlReader::new(output.body.into_async_read()))
    }
}
