//! S3-compatible object store backed by the AWS SDK.
//!
//! Works against AWS S3 as well as MinIO, Ceph and any other
//! S3-compatible endpoint.  Credentials come either from the
//! configuration (static access/secret key) or from the standard AWS
//! credential chain (env vars, `~/.aws/credentials`, IAM role, etc.).

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::backend::{ByteStream, ObjectEntry, ObjectInfo, ObjectStore};
use crate::config::StorageConfig;
use crate::errors::StoreError;

/// Region used when neither the configuration nor the endpoint names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Listing pagination state.
enum Page {
    First,
    Next(String),
    Done,
}

impl Page {
    /// One key is enough to answer whether a prefix has contents; later
    /// pages use the service default.
    fn max_keys(&self) -> Option<i32> {
        matches!(self, Page::First).then_some(1)
    }
}

/// Object store that forwards reads to an S3-compatible service.
pub struct S3Backend {
    /// AWS S3 SDK client.
    client: Client,
    /// The bucket hosting the website.
    bucket: String,
}

impl S3Backend {
    /// Create a new S3 backend from the storage configuration.
    ///
    /// The endpoint (if any) must already have passed
    /// [`StorageConfig::validate`]; key files are read here.
    pub async fn new(storage: &StorageConfig) -> anyhow::Result<Self> {
        let endpoint_host = storage.endpoint_host()?;
        let region = storage
            .region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| endpoint_host.as_deref().and_then(region_from_host))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()));

        if !storage.endpoint.trim().is_empty() {
            config_loader = config_loader.endpoint_url(storage.endpoint.trim());
        }

        // Explicit keys win over the default credential chain.
        if let Some((access_key, secret_key)) = storage.static_credentials()? {
            let creds = aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None, // session_token
                None, // expiry
                "s3www-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let use_path_style = storage
            .use_path_style
            .unwrap_or_else(|| default_path_style(endpoint_host.as_deref()));
        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "S3 backend initialized: bucket={} region={} endpoint='{}' path_style={}",
            storage.bucket, region, storage.endpoint, use_path_style
        );

        Ok(Self {
            client,
            bucket: storage.bucket.clone(),
        })
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error<E>(context: &str, err: E) -> anyhow::Error
    where
        E: std::error::Error,
    {
        anyhow::anyhow!("S3 {context}: {}", DisplayErrorContext(err))
    }
}

impl ObjectStore for S3Backend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_objects(&self, prefix: &str) -> BoxStream<'_, Result<ObjectEntry, StoreError>> {
        let prefix = prefix.to_string();
        stream::try_unfold(Page::First, move |page| {
            let prefix = prefix.clone();
            async move {
                let max_keys = page.max_keys();
                let token = match page {
                    Page::Done => return Ok(None),
                    Page::First => None,
                    Page::Next(token) => Some(token),
                };

                debug!("S3 list_objects_v2: bucket={} prefix={}", self.bucket, prefix);

                let resp = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix)
                    .set_max_keys(max_keys)
                    .set_continuation_token(token)
                    .send()
                    .await
                    .map_err(|e| {
                        StoreError::Unavailable(Self::map_sdk_error("list_objects_v2", e))
                    })?;

                let entries: Vec<Result<ObjectEntry, StoreError>> = resp
                    .contents()
                    .iter()
                    .filter_map(|obj| {
                        obj.key().map(|key| {
                            Ok(ObjectEntry {
                                key: key.to_string(),
                                size: obj.size().unwrap_or(0).max(0) as u64,
                            })
                        })
                    })
                    .collect();

                let next = match (resp.is_truncated(), resp.next_continuation_token()) {
                    (Some(true), Some(token)) => Page::Next(token.to_string()),
                    _ => Page::Done,
                };

                Ok(Some((stream::iter(entries), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    fn stat_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectInfo, StoreError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("S3 head_object: bucket={} key={}", self.bucket, key);

            let resp = match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                        return Err(StoreError::NoSuchKey { key });
                    }
                    return Err(StoreError::Unavailable(Self::map_sdk_error(
                        "head_object",
                        e,
                    )));
                }
            };

            Ok(ObjectInfo {
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                last_modified: resp
                    .last_modified()
                    .and_then(|t| SystemTime::try_from(*t).ok()),
                etag: resp.e_tag().map(str::to_string),
                content_type: resp.content_type().map(str::to_string),
                key,
            })
        })
    }

    fn read_object(
        &self,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, StoreError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "S3 get_object: bucket={} key={} range={:?}",
                self.bucket, key, range
            );

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .set_range(range.map(|(start, end)| format!("bytes={start}-{end}")))
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                        StoreError::NoSuchKey { key: key.clone() }
                    } else {
                        StoreError::Unavailable(Self::map_sdk_error("get_object", e))
                    }
                })?;

            let body: ByteStream = ReaderStream::new(resp.body.into_async_read()).boxed();
            Ok(body)
        })
    }
}

// -- Endpoint helpers ----------------------------------------------------------

/// Derive the AWS region from an `amazonaws.com` endpoint host.
///
/// Recognizes `s3.<region>.amazonaws.com`, `s3-<region>.amazonaws.com`,
/// `s3.dualstack.<region>.amazonaws.com` and the `.com.cn` variants.
/// Returns `None` for the global endpoint and for non-AWS hosts.
pub fn region_from_host(host: &str) -> Option<String> {
    let host = host.to_ascii_lowercase();
    let rest = host
        .strip_suffix(".amazonaws.com")
        .or_else(|| host.strip_suffix(".amazonaws.com.cn"))?;

    let region = if let Some(r) = rest.strip_prefix("s3.dualstack.") {
        r
    } else if let Some(r) = rest.strip_prefix("s3-") {
        r.strip_prefix("external-").map_or(r, |_| "")
    } else if let Some(r) = rest.strip_prefix("s3.") {
        r
    } else {
        ""
    };

    if region.is_empty() || region.contains('.') {
        None
    } else {
        Some(region.to_string())
    }
}

/// True when `host` is an AWS S3 endpoint.
pub fn is_amazon_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host.ends_with(".amazonaws.com") || host.ends_with(".amazonaws.com.cn")
}

/// AWS endpoints use virtual-host style addressing, everything else
/// (MinIO, Ceph, ...) path style.
pub fn default_path_style(endpoint_host: Option<&str>) -> bool {
    endpoint_host.is_some_and(|host| !is_amazon_host(host))
}

// -- Tests -------------------------------------------------------------------
