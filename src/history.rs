//! Per-device scan history.
//!
//! Entries live in a small key-value store: one key per entry plus an index
//! key holding entry ids, newest first. The store is device-local and never
//! exposed over HTTP.

use crate::analyzer::image_hash;
use crate::schema::ScoreResult;
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

const ENTRY_KEY_PREFIX: &str = "nutrilabel:history:";
const INDEX_KEY: &str = "nutrilabel:history:index";

/// JPEG quality for stored thumbnails.
const THUMBNAIL_QUALITY: u8 = 70;

// ── Storage ─────────────────────────────────────────────────────────────────

/// Minimal JSON key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// In-memory store, lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let data = self.data.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut data = self.data.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        data.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        data.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut data = self.data.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        data.clear();
        Ok(())
    }
}

/// Store persisted as one JSON object on disk. Every mutation rewrites the
/// file through a temp file and rename, so readers never see a partial write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read history store: {:?}", path))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse history store: {:?}", path))?
            }
        } else {
            BTreeMap::new()
        };
        debug!("Opened history store {:?} ({} keys)", path, data.len());

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, Value>),
    {
        let mut data = self.data.write().map_err(|_| anyhow!("history store lock poisoned"))?;
        let mut next = data.clone();
        f(&mut next);
        persist(&self.path, &next)?;
        *data = next;
        Ok(())
    }
}

fn persist(path: &Path, data: &BTreeMap<String, Value>) -> Result<()> {
    let json = serde_json::to_vec_pretty(data).context("Failed to serialize history store")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace history store {:?}", path))?;
    Ok(())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let data = self.data.read().map_err(|_| anyhow!("history store lock poisoned"))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.mutate(|data| {
            data.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mutate(|data| {
            data.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.mutate(BTreeMap::clear)
    }
}

// ── History ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub scores: ScoreResult,
    /// JPEG thumbnail as a data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_preview: Option<String>,
}

pub struct History<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> History<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Save an entry. Saving an existing id overwrites it in place.
    pub fn save(&self, entry: &HistoryEntry) -> Result<()> {
        let value = serde_json::to_value(entry).context("Failed to serialize history entry")?;
        self.store.set(&entry_key(&entry.id), value)?;

        let mut index = self.index()?;
        if !index.contains(&entry.id) {
            index.insert(0, entry.id.clone());
            self.write_index(&index)?;
        }
        Ok(())
    }

    /// All entries, newest timestamp first. Index ids whose entry is missing
    /// or unreadable are skipped.
    pub fn list(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries = Vec::new();
        for id in self.index()? {
            match self.get(&id) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => debug!("History index references missing entry {}", id),
                Err(e) => warn!("Skipping unreadable history entry {}: {:#}", id, e),
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>> {
        match self.store.get(&entry_key(id))? {
            Some(value) => {
                let entry = serde_json::from_value(value)
                    .with_context(|| format!("Failed to parse history entry {}", id))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(&entry_key(id))?;
        let index: Vec<String> = self.index()?.into_iter().filter(|e| e != id).collect();
        self.write_index(&index)
    }

    pub fn clear(&self) -> Result<()> {
        for id in self.index()? {
            self.store.delete(&entry_key(&id))?;
        }
        self.store.clear()?;
        self.write_index(&[])
    }

    fn index(&self) -> Result<Vec<String>> {
        match self.store.get(INDEX_KEY)? {
            Some(value) => serde_json::from_value(value).context("Failed to parse history index"),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, index: &[String]) -> Result<()> {
        self.store.set(INDEX_KEY, serde_json::to_value(index)?)
    }
}

fn entry_key(id: &str) -> String {
    format!("{}{}", ENTRY_KEY_PREFIX, id)
}

/// Content-derived id, so rescanning the same photo overwrites its entry.
/// Matches the `imageHash` returned by the analyze endpoint.
pub fn history_id(image: &[u8]) -> String {
    image_hash(image)
}

/// Downscale `image` to fit within `max_dim` and encode it as a JPEG data URL.
pub fn thumbnail_data_url(image: &[u8], max_dim: u32) -> Result<String> {
    let decoded = image::load_from_memory(image).context("Failed to decode image for thumbnail")?;
    let thumb = decoded.thumbnail(max_dim, max_dim).to_rgb8();

    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(thumb)
        .write_to(&mut buf, image::ImageOutputFormat::Jpeg(THUMBNAIL_QUALITY))
        .context("Failed to encode thumbnail")?;

    Ok(format!(
        "data:image/jpeg;base64,{}",
        BASE64.encode(buf.into_inner())
    ))
}
