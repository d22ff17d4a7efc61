#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use exam_kernel_contracts::ContractViolation;
use serde::{Deserialize, Serialize};

pub const DOCUMENT_CONTENT_KEY: &str = "document-content";
pub const DOCUMENT_TITLE_KEY: &str = "document-title";

const STORE_SCHEMA_VERSION: u8 = 1;

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Json(serde_json::Error),
    SchemaMismatch { found: u8 },
    ContractViolation(ContractViolation),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::SchemaMismatch { found } => {
                write!(f, "document store schema {found} is not supported")
            }
            Self::ContractViolation(v) => write!(f, "stored document is invalid: {v}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ContractViolation> for StorageError {
    fn from(value: ContractViolation) -> Self {
        Self::ContractViolation(value)
    }
}

/// Browser-style local key/value storage. A missing key is `Ok(None)`, never an error.
pub trait DocumentStore {
    fn put(&mut self, key: &str, value: String) -> Result<(), StorageError>;
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
}

impl<S> DocumentStore for Box<S>
where
    S: DocumentStore + ?Sized,
{
    fn put(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    entries: BTreeMap<String, String>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn put(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    schema_version: u8,
    entries: BTreeMap<String, String>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Single JSON file holding every key; rewritten atomically on each `put`.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    path: PathBuf,
}

impl FileDocumentStore {
    pub fn for_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<Option<StoreFile>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Some(StoreFile::default()));
        }
        let file = serde_json::from_str::<StoreFile>(&raw)?;
        if file.schema_version != STORE_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                found: file.schema_version,
            });
        }
        Ok(Some(file))
    }

    fn write_file(&self, file: &StoreFile) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(file)?;
        atomic_write(&self.path, &serialized)
    }
}

impl DocumentStore for FileDocumentStore {
    fn put(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        let mut file = self.read_file()?.unwrap_or_default();
        file.entries.insert(key.to_string(), value);
        self.write_file(&file)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .read_file()?
            .and_then(|mut file| file.entries.remove(key)))
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}
