use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{Result, VisualiserError};

/// Identifier of the audio to retrieve, typically a path or URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Retrieves raw audio bytes. Implementations do not validate the format and
/// do not retry.
pub trait AudioFetcher {
    fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<u8>>;
}

/// Reads sources from the filesystem, relative to an optional root.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, id: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(id),
            None => Path::new(id).to_path_buf(),
        }
    }
}

impl AudioFetcher for FileFetcher {
    fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<u8>> {
        let path = self.resolve(&source.id);
        tracing::debug!(path = %path.display(), "reading audio file");
        std::fs::read(&path).map_err(|err| VisualiserError::Fetch {
            source_id: source.id.clone(),
            reason: err.to_string(),
        })
    }
}

/// Serves pre-registered byte buffers.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(id.into(), bytes);
    }
}

impl AudioFetcher for MemoryFetcher {
    fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<u8>> {
        self.entries
            .get(&source.id)
            .cloned()
            .ok_or_else(|| VisualiserError::Fetch {
                source_id: source.id.clone(),
                reason: "no such entry".to_string(),
            })
    }
}
