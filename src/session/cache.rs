//! Shared credential cache for linked sessions.
//!
//! The primary session persists its credential here on first successful
//! authentication so a linked session can import it without a remote
//! round-trip. The backing store is pluggable; the default writes one JSON
//! file per suffix-stripped session key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::auth::Credential;
use crate::error::CacheError;

/// Pluggable store for credentials shared between linked sessions.
///
/// Keys are caller-controlled (the suffix-stripped session key), so
/// implementations must not trust them as-is for anything path-like.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Credential>, CacheError>;
    async fn put(&self, key: &str, credential: &Credential) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// File-backed credential cache: one JSON file per key under `dir`.
pub struct FileCredentialCache {
    dir: PathBuf,
}

impl FileCredentialCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(sanitize_key(key))
    }
}

/// Collapse a caller-controlled key into a safe file name.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn write_restricted(path: &Path, json: String) -> std::io::Result<()> {
    tokio::fs::write(path, json).await?;

    // The file contains a live access token.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

#[async_trait]
impl CredentialCache for FileCredentialCache {
    async fn get(&self, key: &str) -> Result<Option<Credential>, CacheError> {
        let path = self.path_for(key);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn put(&self, key: &str, credential: &Credential) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let json = serde_json::to_string(credential)?;
        write_restricted(&path, json).await?;
        tracing::debug!("Persisted credential to {}", path.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
