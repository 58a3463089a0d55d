//! Dedup store
//!
//! Three membership sets (URL hashes, incident keys, content fingerprints)
//! checked in that order. `admit` runs the whole check-and-insert under one
//! lock so two workers can never both accept the same incident.
//!
//! Within a run any strictly longer text of a known incident replaces the
//! stored one. Against records loaded from an earlier run the new text must
//! exceed the stored length times `material_growth`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use intelfeed_core::{ArticleIdentity, KeyKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Dedup store I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt dedup store {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize dedup store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of offering an article identity to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Same incident, materially longer text with a new fingerprint
    Replaced { previous_len: usize },
    Duplicate(KeyKind),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub urls: usize,
    pub incidents: usize,
    pub content: usize,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn exists(&self, key: &str, kind: KeyKind) -> Result<bool, StoreError>;

    /// Record a key unconditionally. Incident keys added this way carry length 0.
    async fn add(&self, key: &str, kind: KeyKind) -> Result<(), StoreError>;

    /// Atomic check-and-insert of all three keys
    async fn admit(
        &self,
        identity: &ArticleIdentity,
        text_len: usize,
    ) -> Result<Admission, StoreError>;

    async fn flush(&self) -> Result<(), StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;
}

/// Membership sets shared by both backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Membership {
    urls: BTreeSet<String>,
    /// Incident key to stored text length
    incidents: BTreeMap<String, usize>,
    content: BTreeSet<String>,
    /// Incidents recorded by this process
    #[serde(skip)]
    this_run: BTreeSet<String>,
}

impl Membership {
    fn contains(&self, key: &str, kind: KeyKind) -> bool {
        match kind {
            KeyKind::Url => self.urls.contains(key),
            KeyKind::Incident => self.incidents.contains_key(key),
            KeyKind::Content => self.content.contains(key),
        }
    }

    fn insert(&mut self, key: &str, kind: KeyKind) {
        match kind {
            KeyKind::Url => {
                self.urls.insert(key.to_string());
            }
            KeyKind::Incident => {
                self.incidents.entry(key.to_string()).or_insert(0);
            }
            KeyKind::Content => {
                self.content.insert(key.to_string());
            }
        }
    }

    fn record(&mut self, identity: &ArticleIdentity, text_len: usize) {
        self.urls.insert(identity.url_hash.clone());
        self.incidents.insert(identity.incident_key.clone(), text_len);
        self.content.insert(identity.content_fingerprint.clone());
        self.this_run.insert(identity.incident_key.clone());
    }

    fn admit(&mut self, identity: &ArticleIdentity, text_len: usize, growth: f64) -> Admission {
        if self.urls.contains(&identity.url_hash) {
            return Admission::Duplicate(KeyKind::Url);
        }

        if let Some(&stored) = self.incidents.get(&identity.incident_key) {
            let longer = if self.this_run.contains(&identity.incident_key) {
                text_len > stored
            } else {
                text_len as f64 > stored as f64 * growth
            };
            if longer && !self.content.contains(&identity.content_fingerprint) {
                self.record(identity, text_len);
                return Admission::Replaced { previous_len: stored };
            }
            return Admission::Duplicate(KeyKind::Incident);
        }

        if self.content.contains(&identity.content_fingerprint) {
            return Admission::Duplicate(KeyKind::Content);
        }

        self.record(identity, text_len);
        Admission::Admitted
    }

    fn counts(&self) -> StoreCounts {
        StoreCounts {
            urls: self.urls.len(),
            incidents: self.incidents.len(),
            content: self.content.len(),
        }
    }
}

/// Process-local store
pub struct MemoryDedupStore {
    state: Mutex<Membership>,
    material_growth: f64,
}

impl MemoryDedupStore {
    pub fn new(material_growth: f64) -> Self {
        Self {
            state: Mutex::new(Membership::default()),
            material_growth,
        }
    }
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new(1.25)
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn exists(&self, key: &str, kind: KeyKind) -> Result<bool, StoreError> {
        Ok(self.state.lock().contains(key, kind))
    }

    async fn add(&self, key: &str, kind: KeyKind) -> Result<(), StoreError> {
        self.state.lock().insert(key, kind);
        Ok(())
    }

    async fn admit(
        &self,
        identity: &ArticleIdentity,
        text_len: usize,
    ) -> Result<Admission, StoreError> {
        Ok(self.state.lock().admit(identity, text_len, self.material_growth))
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(self.state.lock().counts())
    }
}

/// JSON file backed store. Loaded whole at open, rewritten whole on flush.
pub struct JsonFileDedupStore {
    path: PathBuf,
    state: Mutex<Membership>,
    material_growth: f64,
}

impl JsonFileDedupStore {
    /// Open or create the store at `path`. An unreadable file is an error,
    /// never silently reset.
    pub async fn open<P: AsRef<Path>>(
        path: P,
        material_growth: f64,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No dedup store at {}, starting empty", path.display());
                Membership::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let store = Self {
            path,
            state: Mutex::new(state),
            material_growth,
        };
        let counts = store.state.lock().counts();
        info!(
            "Dedup store {}: {} urls, {} incidents",
            store.path.display(),
            counts.urls,
            counts.incidents
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DedupStore for JsonFileDedupStore {
    async fn exists(&self, key: &str, kind: KeyKind) -> Result<bool, StoreError> {
        Ok(self.state.lock().contains(key, kind))
    }

    async fn add(&self, key: &str, kind: KeyKind) -> Result<(), StoreError> {
        self.state.lock().insert(key, kind);
        Ok(())
    }

    async fn admit(
        &self,
        identity: &ArticleIdentity,
        text_len: usize,
    ) -> Result<Admission, StoreError> {
        Ok(self.state.lock().admit(identity, text_len, self.material_growth))
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let json = {
            let state = self.state.lock();
            serde_json::to_string_pretty(&*state)?
        };
        write_atomic(&self.path, json.as_bytes())
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(self.state.lock().counts())
    }
}

/// Write to a sibling temp file, then rename over the target
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}
