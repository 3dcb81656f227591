//! Relational side of the system: authorized people and the authentication
//! audit trail, persisted together in one JSON document.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::lock::{lock_path_for, FileLock, LockMode};
use crate::persist::write_atomically;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedPerson {
    pub id: u64,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub face_encoding: Vec<u8>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLogEntry {
    pub id: u64,
    pub timestamp: String,
    pub authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthLogPage {
    pub count: usize,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<AuthLogEntry>,
    pub has_next: bool,
    pub has_previous: bool,
}

pub trait PersonRegistry {
    fn create(&self, name: &str, face_encoding: &[u8]) -> AppResult<AuthorizedPerson>;
    fn get(&self, name: &str) -> AppResult<AuthorizedPerson>;
    fn delete(&self, person: &AuthorizedPerson) -> AppResult<()>;
}

pub trait AuditLog {
    fn record(&self, authenticated: bool) -> AppResult<AuthLogEntry>;
    fn list(&self, page: usize, page_size: usize) -> AppResult<AuthLogPage>;
}

/// Slices an audit trail into a 1-based page, newest entries first.
pub fn paginate(
    mut entries: Vec<AuthLogEntry>,
    page: usize,
    page_size: usize,
) -> AppResult<AuthLogPage> {
    if page_size == 0 {
        return Err(AppError::Validation {
            field: "page_size",
            message: "must be at least 1".into(),
        });
    }
    let count = entries.len();
    let invalid = || AppError::InvalidPage {
        page,
        page_size,
        count,
    };
    if page == 0 {
        return Err(invalid());
    }

    let start = (page - 1).checked_mul(page_size).ok_or_else(invalid)?;
    if start >= count && !(page == 1 && count == 0) {
        return Err(invalid());
    }

    entries.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.id.cmp(&a.id))
    });
    let end = start.saturating_add(page_size).min(count);
    let results = entries.drain(start..end).collect();

    Ok(AuthLogPage {
        count,
        page,
        page_size,
        results,
        has_next: end < count,
        has_previous: page > 1,
    })
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    next_person_id: u64,
    #[serde(default)]
    next_log_id: u64,
    #[serde(default)]
    persons: Vec<AuthorizedPerson>,
    #[serde(default)]
    auth_logs: Vec<AuthLogEntry>,
}

/// File-backed registry. Every operation is a load, modify, atomic save cycle
/// under an in-process mutex and a `flock` on `<path>.lock`, so separate
/// processes sharing the file never lose each other's writes.
pub struct JsonRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> AppResult<RegistryDocument> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(RegistryDocument::default())
            }
            Err(source) => {
                return Err(AppError::RegistryRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&data).map_err(|err| AppError::CorruptRegistry {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    fn save(&self, document: &RegistryDocument) -> AppResult<()> {
        let serialized = serde_json::to_vec_pretty(document)?;
        write_atomically(&self.path, &serialized).map_err(|source| AppError::RegistryWrite {
            path: self.path.clone(),
            source,
        })
    }

    fn modify<T>(&self, f: impl FnOnce(&mut RegistryDocument) -> AppResult<T>) -> AppResult<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file = FileLock::acquire(&lock_path_for(&self.path), LockMode::Exclusive)?;
        let mut document = self.load()?;
        let value = f(&mut document)?;
        self.save(&document)?;
        Ok(value)
    }

    fn read(&self) -> AppResult<RegistryDocument> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file = FileLock::acquire(&lock_path_for(&self.path), LockMode::Shared)?;
        self.load()
    }
}

impl PersonRegistry for JsonRegistry {
    fn create(&self, name: &str, face_encoding: &[u8]) -> AppResult<AuthorizedPerson> {
        self.modify(|document| {
            if document.persons.iter().any(|person| person.name == name) {
                return Err(AppError::PersonExists {
                    name: name.to_string(),
                });
            }
            document.next_person_id += 1;
            let person = AuthorizedPerson {
                id: document.next_person_id,
                name: name.to_string(),
                face_encoding: face_encoding.to_vec(),
                created_at: now_timestamp(),
            };
            document.persons.push(person.clone());
            debug!(id = person.id, name, "created authorized person");
            Ok(person)
        })
    }

    fn get(&self, name: &str) -> AppResult<AuthorizedPerson> {
        self.read()?
            .persons
            .into_iter()
            .find(|person| person.name == name)
            .ok_or_else(|| AppError::NotFound {
                name: name.to_string(),
            })
    }

    fn delete(&self, person: &AuthorizedPerson) -> AppResult<()> {
        self.modify(|document| {
            let before = document.persons.len();
            document.persons.retain(|existing| existing.id != person.id);
            if document.persons.len() == before {
                return Err(AppError::NotFound {
                    name: person.name.clone(),
                });
            }
            debug!(id = person.id, name = %person.name, "deleted authorized person");
            Ok(())
        })
    }
}

impl AuditLog for JsonRegistry {
    fn record(&self, authenticated: bool) -> AppResult<AuthLogEntry> {
        self.modify(|document| {
            document.next_log_id += 1;
            let entry = AuthLogEntry {
                id: document.next_log_id,
                timestamp: now_timestamp(),
                authenticated,
            };
            document.auth_logs.push(entry.clone());
            Ok(entry)
        })
    }

    fn list(&self, page: usize, page_size: usize) -> AppResult<AuthLogPage> {
        paginate(self.read()?.auth_logs, page, page_size)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
