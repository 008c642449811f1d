// pgvault/src/cloud/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::StorageClass;

use super::{ObjectStore, ObjectSummary};
use crate::errors::{BackupError, Result};

/// S3 (or S3-compatible, via `endpoint_url`) object store.
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub async fn connect(
        region: &str,
        endpoint_url: Option<&str>,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(s3::config::Credentials::new(
                access_key_id,
                secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Self {
            client: s3::Client::new(&sdk_config),
        }
    }
}

fn transfer_error<E>(action: &str, err: E) -> BackupError
where
    E: std::error::Error,
{
    BackupError::CloudTransfer(format!("{action}: {}", DisplayErrorContext(&err)))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: &[(String, String)],
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/sql")
            .storage_class(StorageClass::StandardIa);
        for (name, value) in metadata {
            request = request.metadata(name, value);
        }
        request
            .send()
            .await
            .map_err(|e| transfer_error(&format!("put s3://{bucket}/{key}"), e))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transfer_error(&format!("get s3://{bucket}/{key}"), e))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| transfer_error(&format!("read body of s3://{bucket}/{key}"), e))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str, max_keys: i32) -> Result<Vec<ObjectSummary>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| transfer_error(&format!("list s3://{bucket}/{prefix}"), e))?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                })
            })
            .collect())
    }
}
