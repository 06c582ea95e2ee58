//! S3-compatible object store adapter.
//!
//! One implementation covers standard S3, Cloudflare R2, and DigitalOcean
//! Spaces; the variants differ only in how the endpoint and region are
//! constructed. Requests are presigned with `rusty-s3` and executed over the
//! shared `reqwest` client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use time::OffsetDateTime;
use time::format_description::well_known::{Rfc2822, Rfc3339};

use crate::config::{AdapterKind, AdapterSettings, S3Settings};

use super::{ObjectInfo, StorageAdapter, StorageError};

const PRESIGN_TTL: Duration = Duration::from_secs(300);

pub struct S3Adapter {
    bucket: Bucket,
    credentials: Credentials,
    client: Client,
    /// Server-side key prefix, already slash-trimmed. Empty means none.
    prefix: String,
}

impl S3Adapter {
    pub fn new(settings: &AdapterSettings, client: Client) -> Result<Self, StorageError> {
        let s3 = settings
            .s3
            .as_ref()
            .ok_or_else(|| StorageError::config("missing [s3] credentials block"))?;
        let (endpoint, region) = endpoint_for(settings.kind, s3)?;

        let endpoint: url::Url = endpoint
            .parse()
            .map_err(|err| StorageError::config(format!("invalid endpoint: {err}")))?;
        let bucket = Bucket::new(endpoint, UrlStyle::Path, s3.bucket.clone(), region)
            .map_err(|err| StorageError::config(format!("invalid bucket: {err}")))?;
        let credentials = Credentials::new(s3.access_key.clone(), s3.secret_key.clone());

        Ok(Self {
            bucket,
            credentials,
            client,
            prefix: settings.path_prefix.trim_matches('/').to_string(),
        })
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn head_url(&self, path: &str) -> url::Url {
        let key = self.key(path);
        self.bucket
            .head_object(Some(&self.credentials), &key)
            .sign(PRESIGN_TTL)
    }

    async fn head(&self, path: &str) -> Result<reqwest::Response, StorageError> {
        Ok(self.client.head(self.head_url(path)).send().await?)
    }

    fn check_status(status: StatusCode, path: &str) -> Result<(), StorageError> {
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound { path: path.into() });
        }
        if !status.is_success() {
            return Err(StorageError::UnexpectedStatus {
                status: status.as_u16(),
                path: path.into(),
            });
        }
        Ok(())
    }

    fn header_last_modified(response: &reqwest::Response) -> Option<OffsetDateTime> {
        response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| OffsetDateTime::parse(value, &Rfc2822).ok())
    }

    /// One page of a flat listing under `prefix/`. Nested keys are skipped;
    /// each cache directory is a flat key space.
    async fn list_prefix(&self, dir: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let key_prefix = format!("{}/", self.key(dir));
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action.query_mut().insert("prefix", key_prefix.clone());
            if let Some(token) = continuation.as_deref() {
                action.query_mut().insert("continuation-token", token);
            }
            let url = action.sign(PRESIGN_TTL);
            let response = self.client.get(url).send().await?;
            Self::check_status(response.status(), dir)?;
            let body = response.text().await?;

            let page = rusty_s3::actions::ListObjectsV2::parse_response(&body)
                .map_err(|err| StorageError::config(format!("unparsable listing: {err}")))?;

            for content in page.contents {
                let Some(remainder) = content.key.strip_prefix(&key_prefix) else {
                    continue;
                };
                if remainder.is_empty() || remainder.contains('/') {
                    continue;
                }
                let last_modified = OffsetDateTime::parse(&content.last_modified, &Rfc3339).ok();
                objects.push(ObjectInfo {
                    path: format!("{dir}/{remainder}"),
                    filename: remainder.to_string(),
                    last_modified,
                });
            }

            match page.next_continuation_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(objects)
    }
}

#[async_trait]
impl StorageAdapter for S3Adapter {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let response = self.head(path).await?;
        match Self::check_status(response.status(), path) {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let key = self.key(path);
        let action = self.bucket.get_object(Some(&self.credentials), &key);
        let url = action.sign(PRESIGN_TTL);
        let response = self.client.get(url).send().await?;
        Self::check_status(response.status(), path)?;
        Ok(response.bytes().await?)
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let key = self.key(path);
        let action = self.bucket.put_object(Some(&self.credentials), &key);
        let url = action.sign(PRESIGN_TTL);
        let response = self.client.put(url).body(data.to_vec()).send().await?;
        Self::check_status(response.status(), path)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let key = self.key(path);
        let action = self.bucket.delete_object(Some(&self.credentials), &key);
        let url = action.sign(PRESIGN_TTL);
        let response = self.client.delete(url).send().await?;
        // S3 deletes are idempotent; 404 still means the object is gone.
        match Self::check_status(response.status(), path) {
            Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<(), StorageError> {
        for object in self.list_prefix(path).await? {
            self.delete(&object.path).await?;
        }
        Ok(())
    }

    /// Object stores have no directories; the prefix springs into existence
    /// with the first write.
    async fn create_directory(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        self.list_prefix(path).await
    }

    async fn last_modified(&self, path: &str) -> Result<OffsetDateTime, StorageError> {
        let response = self.head(path).await?;
        Self::check_status(response.status(), path)?;
        Self::header_last_modified(&response)
            .ok_or_else(|| StorageError::config("missing Last-Modified header"))
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let response = self.head(path).await?;
        Self::check_status(response.status(), path)?;
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| StorageError::config("missing Content-Length header"))
    }
}

/// Endpoint and region construction is the only thing the three
/// S3-compatible variants disagree on.
fn endpoint_for(kind: AdapterKind, s3: &S3Settings) -> Result<(String, String), StorageError> {
    match kind {
        AdapterKind::S3 => {
            if s3.region.is_empty() {
                return Err(StorageError::config("s3 adapter requires a region"));
            }
            let endpoint = s3
                .endpoint
                .clone()
                .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", s3.region));
            Ok((endpoint, s3.region.clone()))
        }
        AdapterKind::R2 => {
            let endpoint = s3
                .endpoint
                .clone()
                .ok_or_else(|| StorageError::config("r2 adapter requires an endpoint"))?;
            let region = if s3.region.is_empty() {
                "auto".to_string()
            } else {
                s3.region.clone()
            };
            Ok((endpoint, region))
        }
        AdapterKind::DoSpaces => {
            if s3.region.is_empty() && s3.endpoint.is_none() {
                return Err(StorageError::config("dospaces adapter requires a region"));
            }
            let endpoint = s3
                .endpoint
                .clone()
                .unwrap_or_else(|| format!("https://{}.digitaloceanspaces.com", s3.region));
            Ok((endpoint, s3.region.clone()))
        }
        AdapterKind::Local => Err(StorageError::config(
            "local adapter cannot be built as an object store",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_settings() -> S3Settings {
        S3Settings {
            access_key: "AK".into(),
            secret_key: "SK".into(),
            region: "us-east-1".into(),
            bucket: "artifacts".into(),
            endpoint: None,
        }
    }

    #[test]
    fn s3_endpoint_derived_from_region() {
        let (endpoint, region) = endpoint_for(AdapterKind::S3, &s3_settings()).expect("endpoint");
        assert_eq!(endpoint, "https://s3.us-east-1.amazonaws.com");
        assert_eq!(region, "us-east-1");
    }

    #[test]
    fn r2_requires_endpoint_and_defaults_region() {
        let mut settings = s3_settings();
        settings.region = String::new();
        assert!(endpoint_for(AdapterKind::R2, &settings).is_err());

        settings.endpoint = Some("https://acct.r2.cloudflarestorage.com".into());
        let (endpoint, region) = endpoint_for(AdapterKind::R2, &settings).expect("endpoint");
        assert_eq!(endpoint, "https://acct.r2.cloudflarestorage.com");
        assert_eq!(region, "auto");
    }

    #[test]
    fn dospaces_endpoint_derived_from_region() {
        let mut settings = s3_settings();
        settings.region = "nyc3".into();
        let (endpoint, _) = endpoint_for(AdapterKind::DoSpaces, &settings).expect("endpoint");
        assert_eq!(endpoint, "https://nyc3.digitaloceanspaces.com");
    }

    #[test]
    fn adapter_requires_credentials_block() {
        let settings = AdapterSettings {
            name: "remote".into(),
            kind: AdapterKind::S3,
            root: None,
            path_prefix: String::new(),
            s3: None,
        };
        assert!(matches!(
            S3Adapter::new(&settings, Client::new()),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn keys_carry_path_prefix() {
        let settings = AdapterSettings {
            name: "remote".into(),
            kind: AdapterKind::S3,
            root: None,
            path_prefix: "/sites/main/".into(),
            s3: Some(s3_settings()),
        };
        let adapter = S3Adapter::new(&settings, Client::new()).expect("adapter");
        assert_eq!(adapter.key("cache/a.jpg"), "sites/main/cache/a.jpg");
    }

    #[test]
    fn presigned_head_targets_the_prefixed_key() {
        let settings = AdapterSettings {
            name: "remote".into(),
            kind: AdapterKind::S3,
            root: None,
            path_prefix: "sites/main".into(),
            s3: Some(s3_settings()),
        };
        let adapter = S3Adapter::new(&settings, Client::new()).expect("adapter");
        let url = adapter.head_url("cache/img_1e.jpg");
        assert_eq!(url.path(), "/artifacts/sites/main/cache/img_1e.jpg");
        assert!(url.query().is_some_and(|q| q.contains("X-Amz-Signature")));
    }
}
