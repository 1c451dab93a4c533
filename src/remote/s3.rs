//! S3 and S3-compatible object store

use std::path::Path;

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::{RemotePath, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{BackupError, Result};

/// Region used when neither the configuration nor the environment names one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Blocking facade over the async S3 client, driven by a private runtime
pub struct S3Remote {
    runtime: Runtime,
    client: Client,
    part_size: u64,
}

impl S3Remote {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let runtime = Runtime::new()
            .map_err(|e| BackupError::Remote(format!("failed to start async runtime: {}", e)))?;
        let client = runtime.block_on(build_client(config));
        Ok(Self {
            runtime,
            client,
            part_size: config.part_size_bytes(),
        })
    }

    async fn put_object(&self, local: &Path, remote: &RemotePath) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| BackupError::Remote(format!("cannot read {}: {}", local.display(), e)))?;
        self.client
            .put_object()
            .bucket(remote.bucket())
            .key(remote.key())
            .body(body)
            .send()
            .await
            .map_err(|e| remote_error("put", remote, e))?;
        Ok(())
    }

    async fn multipart_upload(&self, local: &Path, remote: &RemotePath) -> Result<()> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(remote.bucket())
            .key(remote.key())
            .send()
            .await
            .map_err(|e| remote_error("create multipart upload", remote, e))?;
        let upload_id = response
            .upload_id()
            .ok_or_else(|| BackupError::Remote(format!("no upload id returned for {}", remote)))?
            .to_string();

        match self.upload_parts(local, remote, &upload_id).await {
            Ok(parts) => {
                let upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(remote.bucket())
                    .key(remote.key())
                    .upload_id(&upload_id)
                    .multipart_upload(upload)
                    .send()
                    .await
                    .map_err(|e| remote_error("complete multipart upload", remote, e))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(remote.bucket())
                    .key(remote.key())
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        "Failed to abort multipart upload {}: {}",
                        upload_id,
                        DisplayErrorContext(&abort)
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        local: &Path,
        remote: &RemotePath,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = File::open(local).await?;
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;

        loop {
            let mut chunk = Vec::with_capacity(self.part_size as usize);
            (&mut file).take(self.part_size).read_to_end(&mut chunk).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();

            let response = self
                .client
                .upload_part()
                .bucket(remote.bucket())
                .key(remote.key())
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| remote_error("upload part", remote, e))?;
            let etag = response.e_tag().ok_or_else(|| {
                BackupError::Remote(format!("no ETag returned for part {}", part_number))
            })?;
            debug!("Uploaded part {} ({} bytes)", part_number, len);

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
            part_number += 1;
        }

        Ok(parts)
    }

    async fn get_object(&self, remote: &RemotePath, local: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(remote.bucket())
            .key(remote.key())
            .send()
            .await
            .map_err(|e| remote_error("get", remote, e))?;

        let mut file = File::create(local).await?;
        let mut body = response.body;
        let mut received = 0u64;
        while let Some(bytes) = body
            .try_next()
            .await
            .map_err(|e| BackupError::Remote(format!("reading {}: {}", remote, e)))?
        {
            file.write_all(&bytes).await?;
            received += bytes.len() as u64;
        }
        file.flush().await?;
        Ok(received)
    }
}

impl RemoteStore for S3Remote {
    fn upload(&self, local: &Path, remote: &RemotePath) -> Result<u64> {
        let size = std::fs::metadata(local)?.len();
        info!("Uploading {} bytes to {}", size, remote);
        if size > self.part_size {
            self.runtime.block_on(self.multipart_upload(local, remote))?;
        } else {
            self.runtime.block_on(self.put_object(local, remote))?;
        }
        Ok(size)
    }

    fn download(&self, remote: &RemotePath, local: &Path) -> Result<u64> {
        info!("Downloading {}", remote);
        let received = self.runtime.block_on(self.get_object(remote, local))?;
        debug!("Downloaded {} bytes to {}", received, local.display());
        Ok(received)
    }
}

async fn build_client(config: &RemoteConfig) -> Client {
    let region_provider = match &config.region {
        Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
        None => RegionProviderChain::default_provider(),
    }
    .or_else(Region::new(DEFAULT_REGION));

    let shared = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;

    let mut builder = aws_sdk_s3::config::Builder::from(&shared);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint);
    }
    if config.force_path_style {
        builder = builder.force_path_style(true);
    }
    Client::from_conf(builder.build())
}

fn remote_error<E>(operation: &str, remote: &RemotePath, err: E) -> BackupError
where
    E: std::error::Error,
{
    BackupError::Remote(format!(
        "{} {} failed: {}",
        operation,
        remote,
        DisplayErrorContext(&err)
    ))
}
