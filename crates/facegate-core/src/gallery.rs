//! Durable name to embedding mapping.
//!
//! The on-disk form is a single JSON document holding two parallel arrays,
//! `encodings` and `names`, positionally aligned.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::lock::{lock_path_for, FileLock, LockMode};
use crate::persist::write_atomically;
use crate::provider::Embedding;

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding length shared by every entry, `None` for an empty gallery.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|entry| entry.embedding.len())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn append(mut self, name: impl Into<String>, embedding: Embedding) -> Gallery {
        self.entries.push(GalleryEntry {
            name: name.into(),
            embedding,
        });
        self
    }

    /// Drops the first entry named `name`; a gallery without that name comes
    /// back unchanged.
    pub fn remove(mut self, name: &str) -> Gallery {
        if let Some(index) = self.entries.iter().position(|entry| entry.name == name) {
            self.entries.remove(index);
        }
        self
    }

    fn into_file(self) -> GalleryFile {
        let (names, encodings) = self
            .entries
            .into_iter()
            .map(|entry| (entry.name, entry.embedding.into_inner()))
            .unzip();
        GalleryFile { encodings, names }
    }
}

#[derive(Serialize, Deserialize)]
struct GalleryFile {
    encodings: Vec<Vec<f64>>,
    names: Vec<String>,
}

impl GalleryFile {
    fn into_gallery(self, path: &Path) -> AppResult<Gallery> {
        let corrupt = |message: String| AppError::CorruptGallery {
            path: path.to_path_buf(),
            message,
        };

        if self.encodings.len() != self.names.len() {
            return Err(corrupt(format!(
                "{} encodings but {} names",
                self.encodings.len(),
                self.names.len()
            )));
        }

        let expected = self.encodings.first().map(Vec::len);
        let mut entries = Vec::with_capacity(self.names.len());
        for (idx, (name, encoding)) in self.names.into_iter().zip(self.encodings).enumerate() {
            if name.is_empty() {
                return Err(corrupt(format!("entry {idx} has an empty name")));
            }
            if Some(encoding.len()) != expected || encoding.is_empty() {
                return Err(corrupt(format!(
                    "entry {idx} has {} values, expected {}",
                    encoding.len(),
                    expected.unwrap_or_default()
                )));
            }
            entries.push(GalleryEntry {
                name,
                embedding: Embedding::new(encoding),
            });
        }

        Ok(Gallery { entries })
    }
}

pub trait GalleryStore {
    fn load(&self) -> AppResult<Gallery>;
    fn save(&self, gallery: &Gallery) -> AppResult<()>;

    /// Cross-process lock held around a load or a load-modify-save cycle.
    /// Stores that are never shared between processes need none.
    fn lock(&self, _mode: LockMode) -> AppResult<Option<FileLock>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct FilesystemGalleryStore {
    path: PathBuf,
}

impl FilesystemGalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GalleryStore for FilesystemGalleryStore {
    fn load(&self) -> AppResult<Gallery> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no gallery file yet; starting empty");
                return Ok(Gallery::new());
            }
            Err(source) => {
                return Err(AppError::GalleryRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: GalleryFile =
            serde_json::from_slice(&data).map_err(|err| AppError::CorruptGallery {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        let gallery = file.into_gallery(&self.path)?;
        debug!(path = %self.path.display(), entries = gallery.len(), "loaded gallery");
        Ok(gallery)
    }

    fn save(&self, gallery: &Gallery) -> AppResult<()> {
        let serialized = serde_json::to_vec_pretty(&gallery.clone().into_file())?;
        write_atomically(&self.path, &serialized).map_err(|source| AppError::GalleryWrite {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), entries = gallery.len(), "saved gallery");
        Ok(())
    }

    fn lock(&self, mode: LockMode) -> AppResult<Option<FileLock>> {
        FileLock::acquire(&lock_path_for(&self.path), mode).map(Some)
    }
}

/// Serializes gallery access: readers share the lock, read-modify-write
/// cycles hold it exclusively. The in-process lock orders threads; the store's
/// file lock orders processes.
pub struct LockedGallery<S> {
    store: S,
    lock: RwLock<()>,
}

impl<S: GalleryStore> LockedGallery<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshot(&self) -> AppResult<Gallery> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let _file = self.store.lock(LockMode::Shared)?;
        self.store.load()
    }

    /// Loads, hands the gallery to `mutate`, and saves whatever it returns.
    /// Returning `Ok(None)` skips the save.
    pub fn update<F>(&self, mutate: F) -> AppResult<Option<Gallery>>
    where
        F: FnOnce(Gallery) -> AppResult<Option<Gallery>>,
    {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let _file = self.store.lock(LockMode::Exclusive)?;
        let current = self.store.load()?;
        match mutate(current)? {
            Some(next) => {
                self.store.save(&next)?;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    pub fn replace(&self, gallery: &Gallery) -> AppResult<()> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let _file = self.store.lock(LockMode::Exclusive)?;
        self.store.save(gallery)
    }
}
