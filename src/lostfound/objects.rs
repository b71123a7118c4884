use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument};

use crate::lostfound::IncidentId;

/// Folder in the object store that holds all photos of incidents.
const INCIDENT_PHOTOS: &str = "IncidentsPhotos";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("object not found: {0:?}")]
    NotFound(String),

    #[error("resolve object {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Turns a storage reference into a location a client can fetch the object from.
#[async_trait]
pub trait ObjectResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<String, ResolveError>;
}

/// An object store that keeps each object as a file below a root directory.
#[derive(Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_prefix: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into().trim_end_matches('/').to_owned();
        Self { root: root.into(), public_prefix }
    }

    /// Url prefix under which objects are published.
    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Maps a storage reference to a file below the root. References that are empty
    /// or try to leave the root are rejected.
    pub fn locate(&self, path: &str) -> Option<PathBuf> {
        let relpath = Path::new(path);

        let mut components = relpath.components().peekable();
        components.peek()?;

        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }

        Some(self.root.join(relpath))
    }

    #[instrument(skip_all, fields(path))]
    pub async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.locate(path).ok_or_else(|| anyhow!("invalid object path {:?}", path))?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&target, content).await.with_context(|| format!("write {:?}", target))?;
        debug!("Stored {} bytes at {:?}", content.len(), target);

        Ok(())
    }

    /// Deletes a folder and everything below it. A missing folder is not an error.
    #[instrument(skip_all, fields(prefix))]
    pub async fn delete_folder(&self, prefix: &str) -> Result<()> {
        let target = self.locate(prefix).ok_or_else(|| anyhow!("invalid object path {:?}", prefix))?;

        match fs::remove_dir_all(&target).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            res => res.with_context(|| format!("delete {:?}", target)),
        }
    }
}

#[async_trait]
impl ObjectResolver for FsObjectStore {
    async fn resolve(&self, path: &str) -> Result<String, ResolveError> {
        let Some(target) = self.locate(path) else {
            return Err(ResolveError::NotFound(path.to_owned()));
        };

        match fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => Ok(format!("{}/{}", self.public_prefix, path)),
            Ok(_) => Err(ResolveError::NotFound(path.to_owned())),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ResolveError::NotFound(path.to_owned())),
            Err(source) => Err(ResolveError::Io { path: path.to_owned(), source }),
        }
    }
}

/// Folder holding all photos of an incident.
pub fn incident_photo_folder(incident: IncidentId) -> String {
    format!("{}/{}", INCIDENT_PHOTOS, incident)
}

/// Path of a photo belonging to an incident.
pub fn incident_photo_path(incident: IncidentId, name: &str) -> String {
    format!("{}/{}", incident_photo_folder(incident), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_stored_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "/media/");

        store.put("IncidentsPhotos/abc/wallet.jpg", b"jpeg").await.unwrap();

        let url = store.resolve("IncidentsPhotos/abc/wallet.jpg").await.unwrap();
        assert_eq!(url, "/media/IncidentsPhotos/abc/wallet.jpg");
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "/media");

        let err = store.resolve("IncidentsPhotos/abc/missing.jpg").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));

        // folders are not objects
        store.put("IncidentsPhotos/abc/wallet.jpg", b"jpeg").await.unwrap();
        let err = store.resolve("IncidentsPhotos/abc").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_paths_leaving_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("objects"), "/media");

        assert!(store.locate("../secret").is_none());
        assert!(store.locate("/etc/passwd").is_none());
        assert!(store.locate("").is_none());
        assert!(store.put("a/../../b", b"x").await.is_err());

        let err = store.resolve("../objects").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn photo_folder_contains_its_photos() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "/media");

        let id = IncidentId::from([0, 0, 0, 0, 0, 0, 0, 42]);
        assert_eq!(incident_photo_folder(id), "IncidentsPhotos/000000000000002a");
        assert_eq!(incident_photo_path(id, "a.jpg"), "IncidentsPhotos/000000000000002a/a.jpg");

        store.put(&incident_photo_path(id, "a.jpg"), b"a").await.unwrap();
        store.delete_folder(&incident_photo_folder(id)).await.unwrap();
        assert!(store.resolve(&incident_photo_path(id, "a.jpg")).await.is_err());
    }

    #[tokio::test]
    async fn deletes_folders() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "/media");

        store.put("IncidentsPhotos/abc/1.jpg", b"1").await.unwrap();
        store.put("IncidentsPhotos/abc/2.jpg", b"2").await.unwrap();

        store.delete_folder("IncidentsPhotos/abc").await.unwrap();
        assert!(store.resolve("IncidentsPhotos/abc/1.jpg").await.is_err());

        // deleting twice is fine
        store.delete_folder("IncidentsPhotos/abc").await.unwrap();
    }
}
