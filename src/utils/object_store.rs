//! Object storage abstraction
//!
//! Destinations that ship archives off the host talk to an [`ObjectStore`].
//! The production implementation wraps the AWS SDK (any S3-compatible
//! endpoint works); tests use the in-memory [`mock::MockObjectStore`].

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Listing entry for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: Option<u64>,
}

/// Abstraction for object storage operations, enabling mocking in tests
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under the given key
    fn put_object(&self, key: &str, file: &Path) -> Result<()>;

    /// List every object whose key starts with `prefix`
    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    fn delete_object(&self, key: &str) -> Result<()>;

    /// Download an object into a local file
    fn get_object(&self, key: &str, dest: &Path) -> Result<()>;
}

/// Connection settings, resolved from config with environment fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
}

impl S3Settings {
    /// Fill in anything the config left out from AWS_* environment variables
    pub fn resolve(
        bucket: Option<&str>,
        region: Option<&str>,
        endpoint: Option<&str>,
        force_path_style: bool,
    ) -> Result<Self> {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let bucket = bucket
            .map(str::to_string)
            .or_else(|| from_env("AWS_BUCKET"))
            .context("No bucket configured and AWS_BUCKET is not set")?;

        Ok(Self {
            bucket,
            region: region.map(str::to_string).or_else(|| from_env("AWS_DEFAULT_REGION")),
            endpoint: endpoint.map(str::to_string).or_else(|| from_env("AWS_ENDPOINT")),
            force_path_style,
        })
    }
}

/// S3-backed object store
///
/// The SDK is async; the engine is not. A private runtime drives each call.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    runtime: tokio::runtime::Runtime,
}

impl S3ObjectStore {
    pub fn connect(settings: &S3Settings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build runtime for S3 client")?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = &settings.region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }
            if let Some(endpoint) = &settings.endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            let sdk_config = loader.load().await;

            let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
                .force_path_style(settings.force_path_style)
                .build();
            Client::from_conf(s3_config)
        });

        info!("Connected to object storage bucket: {}", settings.bucket);

        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
            runtime,
        })
    }
}

/// Part size for multipart uploads; files up to this size go in one request
pub const MULTIPART_PART_SIZE: u64 = 64 * 1024 * 1024;

/// `(part_number, offset, length)` of each part of a `size`-byte upload
pub fn multipart_ranges(size: u64, part_size: u64) -> Vec<(i32, u64, u64)> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    let mut part_number = 1;
    while offset < size {
        let length = part_size.min(size - offset);
        ranges.push((part_number, offset, length));
        offset += length;
        part_number += 1;
    }
    ranges
}

impl S3ObjectStore {
    /// Upload a large file part by part, aborting the upload on any failure
    fn put_object_multipart(&self, key: &str, file: &Path, size: u64) -> Result<()> {
        self.runtime.block_on(async {
            let create = self
                .client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .context(format!("Failed to start multipart upload of {}", key))?;
            let upload_id = create
                .upload_id()
                .context(format!("No upload id returned for {}", key))?
                .to_string();

            match self.upload_parts(key, file, size, &upload_id).await {
                Ok(parts) => {
                    self.client
                        .complete_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .multipart_upload(
                            CompletedMultipartUpload::builder()
                                .set_parts(Some(parts))
                                .build(),
                        )
                        .send()
                        .await
                        .context(format!("Failed to complete multipart upload of {}", key))?;
                    info!("Uploaded {} in parts ({} bytes)", key, size);
                    Ok(())
                }
                Err(e) => {
                    if let Err(abort) = self
                        .client
                        .abort_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .send()
                        .await
                    {
                        warn!("Failed to abort multipart upload of {}: {}", key, abort);
                    }
                    Err(e)
                }
            }
        })
    }

    async fn upload_parts(
        &self,
        key: &str,
        file: &Path,
        size: u64,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        for (part_number, offset, length) in multipart_ranges(size, MULTIPART_PART_SIZE) {
            let body = ByteStream::read_from()
                .path(file)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .context(format!("Failed to read part {} of {:?}", part_number, file))?;

            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .context(format!("Failed to upload part {} of {}", part_number, key))?;

            debug!("Uploaded part {} of {}", part_number, key);
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(resp.e_tag().map(str::to_string))
                    .build(),
            );
        }
        Ok(parts)
    }
}

fn to_utc(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    Utc.timestamp_opt(dt.secs(), dt.subsec_nanos())
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl ObjectStore for S3ObjectStore {
    fn put_object(&self, key: &str, file: &Path) -> Result<()> {
        let size = std::fs::metadata(file)
            .context(format!("Failed to stat {:?} for upload", file))?
            .len();
        debug!("Uploading {:?} ({} bytes) to s3://{}/{}", file, size, self.bucket, key);

        if size > MULTIPART_PART_SIZE {
            return self.put_object_multipart(key, file, size);
        }

        self.runtime.block_on(async {
            let body = ByteStream::from_path(file)
                .await
                .context(format!("Failed to read {:?} for upload", file))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .context(format!("Failed to upload object {}", key))?;
            Ok(())
        })
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.runtime.block_on(async {
            let mut objects = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let resp = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .context(format!("Unable to list items in bucket {}", self.bucket))?;

                for obj in resp.contents() {
                    let Some(key) = obj.key() else { continue };
                    objects.push(ObjectInfo {
                        key: key.to_string(),
                        last_modified: obj
                            .last_modified()
                            .map(to_utc)
                            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                        size: obj.size().and_then(|s| u64::try_from(s).ok()),
                    });
                }

                match resp.next_continuation_token() {
                    Some(token) if resp.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            Ok(objects)
        })
    }

    fn delete_object(&self, key: &str) -> Result<()> {
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .context(format!("Failed to delete object {}", key))?;
            Ok(())
        })
    }

    fn get_object(&self, key: &str, dest: &Path) -> Result<()> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .context(format!("Failed to download object {}", key))?;
            let mut body = resp.body.into_async_read();
            let mut file = tokio::fs::File::create(dest)
                .await
                .context(format!("Failed to create {:?}", dest))?;
            let written = tokio::io::copy(&mut body, &mut file)
                .await
                .context(format!("Failed to download object {} into {:?}", key, dest))?;
            file.flush()
                .await
                .context(format!("Failed to write {:?}", dest))?;
            debug!("Downloaded {} ({} bytes) to {:?}", key, written, dest);
            Ok(())
        })
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Recorded object store call
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum StoreCall {
        Put { key: String },
        List { prefix: String },
        Delete { key: String },
        Get { key: String },
    }

    /// In-memory object store for testing
    #[derive(Clone, Default)]
    pub struct MockObjectStore {
        /// Recorded operation calls
        pub calls: Arc<Mutex<Vec<StoreCall>>>,
        objects: Arc<Mutex<BTreeMap<String, (DateTime<Utc>, Vec<u8>)>>>,
        should_fail_put: Arc<Mutex<bool>>,
        should_fail_delete: Arc<Mutex<bool>>,
    }

    impl MockObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed an object with a given modification time
        pub fn with_object(self, key: &str, last_modified: DateTime<Utc>, body: &[u8]) -> Self {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (last_modified, body.to_vec()));
            self
        }

        /// Configure uploads to fail
        pub fn with_failing_put(self) -> Self {
            *self.should_fail_put.lock().unwrap() = true;
            self
        }

        /// Configure deletes to fail
        pub fn with_failing_delete(self) -> Self {
            *self.should_fail_delete.lock().unwrap() = true;
            self
        }

        pub fn keys(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }

        pub fn body(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.lock().unwrap().get(key).map(|(_, b)| b.clone())
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<StoreCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record_call(&self, call: StoreCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ObjectStore for MockObjectStore {
        fn put_object(&self, key: &str, file: &Path) -> Result<()> {
            self.record_call(StoreCall::Put { key: key.to_string() });
            if *self.should_fail_put.lock().unwrap() {
                anyhow::bail!("Mock upload failure for {}", key);
            }
            let body = std::fs::read(file).context(format!("Failed to read {:?}", file))?;
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (Utc::now(), body));
            Ok(())
        }

        fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
            self.record_call(StoreCall::List { prefix: prefix.to_string() });
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, (modified, body))| ObjectInfo {
                    key: k.clone(),
                    last_modified: *modified,
                    size: Some(body.len() as u64),
                })
                .collect())
        }

        fn delete_object(&self, key: &str) -> Result<()> {
            self.record_call(StoreCall::Delete { key: key.to_string() });
            if *self.should_fail_delete.lock().unwrap() {
                anyhow::bail!("Mock delete failure for {}", key);
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn get_object(&self, key: &str, dest: &Path) -> Result<()> {
            self.record_call(StoreCall::Get { key: key.to_string() });
            let body = self
                .body(key)
                .ok_or_else(|| anyhow::anyhow!("NoSuchKey: {}", key))?;
            std::fs::write(dest, body).context(format!("Failed to write {:?}", dest))?;
            Ok(())
        }
    }
}
