// dumpkeeper/src/store/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::DateTime;
use s3::config::Region;
use s3::error::{DisplayErrorContext, SdkError};
use s3::primitives::ByteStream;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{Listing, Store, StoredFile, partial_path};
use crate::config::SpacesConfig;
use crate::errors::StoreError;
use crate::utils::paths;

/// S3-compatible bucket (AWS, DigitalOcean Spaces, MinIO).
///
/// Object stores have no real directories: `make_dir` succeeds without doing
/// anything and the listing derives directories from key prefixes.
/// `remove_empty_dir` deletes the zero-byte `<dir>/` marker some clients
/// leave behind, if there is one.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    prefix: String,
}

fn transport<E>(err: SdkError<E>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Transport(DisplayErrorContext(&err).to_string())
}

impl S3Store {
    pub async fn connect(spaces_config: &SpacesConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&spaces_config.endpoint_url)
            .region(Region::new(spaces_config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &spaces_config.access_key_id,
                &spaces_config.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(spaces_config.force_path_style)
            .build();

        S3Store {
            client: s3::Client::from_conf(s3_config),
            bucket: spaces_config.bucket_name.clone(),
            prefix: spaces_config
                .folder_prefix
                .as_deref()
                .map(paths::normalize)
                .unwrap_or_default(),
        }
    }

    fn key(&self, path: &str) -> String {
        paths::join(&self.prefix, path)
    }

    fn marker_key(&self, dir: &str) -> String {
        marker_key(&self.prefix, dir)
    }

    fn store_path<'a>(&self, key: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(key);
        }
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

fn marker_key(prefix: &str, dir: &str) -> String {
    format!("{}/", paths::join(prefix, dir))
}

#[async_trait]
impl Store for S3Store {
    fn label(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    async fn list(&self) -> Result<Listing, StoreError> {
        let list_prefix = if self.prefix.is_empty() {
            None
        } else {
            Some(format!("{}/", self.prefix))
        };

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(list_prefix.clone())
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StoreError::Listing(DisplayErrorContext(&e).to_string()))?;

            for object in resp.contents() {
                let Some(key) = object.key() else { continue };
                let Some(rel) = self.store_path(key) else { continue };
                let path = paths::normalize(rel);
                if path.is_empty() {
                    continue;
                }
                // Zero-byte "folder" markers created by some clients.
                if key.ends_with('/') {
                    dirs.push(path);
                    continue;
                }
                files.push(StoredFile {
                    path,
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                    modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
                        .map(|t| t.naive_utc()),
                });
            }

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        debug!("Listed {} objects in {}", files.len(), self.label());
        Ok(Listing::new(files, dirs))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(transport(e)),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn remove_empty_dir(&self, path: &str) -> Result<(), StoreError> {
        // DeleteObject succeeds for a missing key, so implicit directories
        // need no special case.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.marker_key(path))
            .send()
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn make_dir(&self, _path: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upload(&self, source: &Path, path: &str) -> Result<u64, StoreError> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| StoreError::from_io(path, e))?
            .len();
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StoreError::Io {
                path: path.to_string(),
                source: std::io::Error::other(e),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        Ok(size)
    }

    async fn download(&self, path: &str, destination: &Path) -> Result<u64, StoreError> {
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(transport)?;

        let partial = partial_path(destination);
        let mut output_file = File::create(&partial)
            .await
            .map_err(|e| StoreError::from_io(path, e))?;

        let mut total_bytes_downloaded = 0u64;
        loop {
            let chunk = match object.body.try_next().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(StoreError::Transport(format!("{}: {}", path, e)));
                }
            };
            if let Err(e) = output_file.write_all(&chunk).await {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(StoreError::from_io(path, e));
            }
            total_bytes_downloaded += chunk.len() as u64;
        }
        output_file
            .flush()
            .await
            .map_err(|e| StoreError::from_io(path, e))?;
        drop(output_file);

        tokio::fs::rename(&partial, destination)
            .await
            .map_err(|e| StoreError::from_io(path, e))?;
        Ok(total_bytes_downloaded)
    }
}
