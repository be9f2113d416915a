//! Presigned object-store URLs
//!
//! The store itself lives elsewhere; we only issue time-bounded URLs whose
//! signature the store can check with the shared secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use roomsort_common::config::StorageConfig;
use roomsort_common::{time, Error, Result};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Presigned-URL issuance
pub trait ObjectStore: Send + Sync {
    fn presigned_read_url(&self, path: &str, ttl: Duration) -> Result<String>;

    fn presigned_write_url(&self, path: &str, content_type: &str, ttl: Duration) -> Result<String>;
}

/// Signs `{method, path, expiry}` with SHA-256 over a shared secret
pub struct SignedUrlIssuer {
    base_url: String,
    secret: String,
}

impl SignedUrlIssuer {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::Config("signing secret must not be empty".to_string()));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.signing_secret)
    }

    fn signature(&self, method: &str, path: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    fn sign_at(&self, method: &str, path: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(Error::Validation("object path must not be empty".to_string()));
        }
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| Error::Validation("URL lifetime out of range".to_string()))?;
        let expires = now.timestamp() + ttl;

        Ok(format!(
            "{}/{}?method={}&expires={}&signature={}",
            self.base_url,
            path,
            method,
            expires,
            self.signature(method, path, expires)
        ))
    }

    /// Check a signature presented back to the store
    pub fn verify(&self, method: &str, path: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        now.timestamp() <= expires && self.signature(method, path.trim_start_matches('/'), expires) == signature
    }
}

impl ObjectStore for SignedUrlIssuer {
    fn presigned_read_url(&self, path: &str, ttl: Duration) -> Result<String> {
        self.sign_at("GET", path, ttl, time::now())
    }

    fn presigned_write_url(&self, path: &str, content_type: &str, ttl: Duration) -> Result<String> {
        let url = self.sign_at("PUT", path, ttl, time::now())?;
        Ok(format!("{}&content-type={}", url, content_type.replace('/', "%2F")))
    }
}

/// MIME type of a stored image
pub fn content_type_for(image_type: &str) -> String {
    format!("image/{}", image_type)
}
