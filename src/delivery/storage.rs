//! Stored-object paths and the signed-URL storage backend.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;
use thiserror::Error;

use super::transform::TransformOptions;
use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPath {
    #[error("path is empty")]
    Empty,
    #[error("path must be relative to the storage root")]
    Absolute,
    #[error("path contains an empty, '.' or '..' segment")]
    BadSegment,
    #[error("path contains a forbidden character")]
    ForbiddenCharacter,
}

/// Path of an object relative to the storage root.
///
/// Always `/`-separated, never absolute and never escaping the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath(String);

impl StoragePath {
    pub fn parse(raw: &str) -> Result<Self, InvalidPath> {
        if raw.is_empty() {
            return Err(InvalidPath::Empty);
        }
        if raw.starts_with('/') {
            return Err(InvalidPath::Absolute);
        }
        if raw.chars().any(|c| c == '\\' || c == '\0' || c.is_control()) {
            return Err(InvalidPath::ForbiddenCharacter);
        }
        if raw
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(InvalidPath::BadSegment);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// First path segment, by convention the owning caller or `public`.
    pub fn top_level(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A time-limited link to a stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Backend that mints signed links to stored objects.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create_signed_url(
        &self,
        path: &StoragePath,
        validity: Duration,
        transform: Option<&TransformOptions>,
    ) -> Result<SignedUrl, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link has expired")]
    Expired,
    #[error("link signature is invalid")]
    BadSignature,
}

/// Local-disk storage whose links are verified by this service.
///
/// Links point at `/objects/{path}` and carry an expiry and an HMAC-SHA256
/// token over the path, expiry and transform.
pub struct SigningStorage {
    root: PathBuf,
    base_url: String,
    key: Vec<u8>,
}

impl SigningStorage {
    pub fn new(root: PathBuf, base_url: &str, key: impl Into<Vec<u8>>) -> Self {
        Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.into(),
        }
    }

    /// Build from config; an empty secret gets a random per-process key.
    pub fn from_config(config: &StorageConfig) -> Self {
        let key = if config.signing_secret.is_empty() {
            let bytes: [u8; 32] = rand::random();
            bytes.to_vec()
        } else {
            config.signing_secret.as_bytes().to_vec()
        };
        Self::new(config.root.clone(), &config.public_base_url, key)
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Filesystem location of a stored object.
    pub fn resolve(&self, path: &StoragePath) -> PathBuf {
        path.segments()
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    fn mac(&self, path: &StoragePath, expires: i64, transform: &str) -> Result<HmacSha256, LinkError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| LinkError::BadSignature)?;
        mac.update(path.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(transform.as_bytes());
        Ok(mac)
    }

    /// Token for a link.
    pub fn sign(&self, path: &StoragePath, expires: i64, transform: &str) -> Result<String, StorageError> {
        let mac = self
            .mac(path, expires, transform)
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a presented link.
    pub fn verify(
        &self,
        path: &StoragePath,
        expires: i64,
        transform: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        let expected = hex::decode(token).map_err(|_| LinkError::BadSignature)?;
        self.mac(path, expires, transform)?
            .verify_slice(&expected)
            .map_err(|_| LinkError::BadSignature)?;

        if now.timestamp() > expires {
            return Err(LinkError::Expired);
        }
        Ok(())
    }

    fn link(
        &self,
        path: &StoragePath,
        expires: i64,
        token: &str,
        transform: Option<&TransformOptions>,
    ) -> Result<String, StorageError> {
        let mut url = Url::parse(&format!("{}/objects/", self.base_url))
            .map_err(|e| StorageError::Signing(format!("invalid public base URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| StorageError::Signing("public base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(path.segments());

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("expires", &expires.to_string());
            query.append_pair("token", token);
            if let Some(transform) = transform {
                for (key, value) in transform.query_pairs() {
                    query.append_pair(key, &value);
                }
            }
        }

        Ok(url.to_string())
    }
}

#[async_trait]
impl StorageBackend for SigningStorage {
    async fn create_signed_url(
        &self,
        path: &StoragePath,
        validity: Duration,
        transform: Option<&TransformOptions>,
    ) -> Result<SignedUrl, StorageError> {
        let file = self.resolve(path);
        match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(StorageError::NotFound(path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let validity = chrono::Duration::from_std(validity)
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        let expires_at = Utc::now() + validity;
        let expires = expires_at.timestamp();

        let canonical = transform.map(TransformOptions::canonical).unwrap_or_default();
        let token = self.sign(path, expires, &canonical)?;
        let url = self.link(path, expires, &token, transform)?;

        Ok(SignedUrl { url, expires_at })
    }
}
