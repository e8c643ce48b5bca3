use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::fs;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// `Ok(None)` when nothing is stored under `key`.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing object succeeds.
    async fn delete_object(&self, key: &str) -> Result<()>;
}

/// Report files on local disk, one directory per report.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let only_normal = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !only_normal {
            bail!("invalid storage key {key:?}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to delete {}", path.display()))
            }
        }

        if let Some(parent) = path.parent().filter(|parent| *parent != self.root) {
            // Only succeeds once the per-report directory is empty.
            let _ = fs::remove_dir(parent).await;
        }
        Ok(())
    }
}

/// Keeps ASCII letters, digits, `.` and `-`; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let sanitized: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|ch| ch == '.') {
        "report".to_string()
    } else {
        sanitized
    }
}
