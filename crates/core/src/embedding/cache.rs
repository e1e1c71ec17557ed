//! Content-addressed embedding cache: an in-memory LRU layer in front of
//! on-disk `{sha256(model:text)}.npy`-named files (same cache-key scheme
//! and file naming as the original embedding service, minus numpy's
//! pickle-capable container — entries are encoded with
//! [`super::codec`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::codec;

/// Compute the cache key for a `(model, text)` pair.
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

struct Lru {
    capacity: usize,
    entries: HashMap<String, Vec<f32>>,
    order: Vec<String>,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        if let Some(v) = self.entries.get(key).cloned() {
            self.touch(key);
            Some(v)
        } else {
            None
        }
    }

    fn put(&mut self, key: String, value: Vec<f32>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = (!self.order.is_empty()).then(|| self.order.remove(0)) {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key.clone(), value);
        self.touch(&key);
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push(key.to_owned());
    }
}

/// A two-tier embedding cache: an in-memory LRU backed by a content-addressed
/// directory of `.npy`-suffixed binary files.
pub struct EmbeddingCache {
    dir: PathBuf,
    memory: Mutex<Lru>,
}

impl EmbeddingCache {
    pub fn new(dir: impl AsRef<Path>, memory_capacity: usize) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            memory: Mutex::new(Lru::new(memory_capacity)),
        })
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.npy"))
    }

    /// Look up `(model, text)`, checking the in-memory layer first and
    /// falling back to disk. A corrupted on-disk entry is logged and
    /// treated as a miss rather than propagated.
    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let key = cache_key(model, text);

        if let Some(v) = self.memory.lock().get(&key) {
            debug!(cache_key = %key, "embedding cache hit (memory)");
            return Some(v);
        }

        let path = self.file_path(&key);
        if !path.exists() {
            return None;
        }

        match std::fs::read(&path).and_then(|data| {
            codec::decode(&data).map_err(|e| std::io::Error::other(e.to_string()))
        }) {
            Ok(vector) => {
                debug!(cache_key = %key, "embedding cache hit (disk)");
                self.memory.lock().put(key, vector.clone());
                Some(vector)
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to load cached embedding");
                None
            }
        }
    }

    /// Store `vector` under `(model, text)`'s cache key, in both tiers.
    pub fn put(&self, model: &str, text: &str, vector: &[f32]) {
        let key = cache_key(model, text);
        let path = self.file_path(&key);
        if let Err(e) = std::fs::write(&path, codec::encode(vector)) {
            warn!(error = %e, path = %path.display(), "failed to cache embedding");
        } else {
            debug!(cache_key = %key, "saved embedding to cache");
        }
        self.memory.lock().put(key, vector.to_vec());
    }

    /// Remove every cached entry on disk, returning the number removed.
    pub fn clear(&self) -> std::io::Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("npy") {
                std::fs::remove_file(entry.path())?;
                count += 1;
            }
        }
        self.memory.lock().entries.clear();
        self.memory.lock().order.clear();
        Ok(count)
    }

    /// Count and total byte size of every cached entry on disk.
    pub fn size(&self) -> std::io::Result<(usize, u64)> {
        let mut count = 0;
        let mut bytes = 0u64;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("npy") {
                bytes += entry.metadata()?.len();
                count += 1;
            }
        }
        Ok((count, bytes))
    }

    /// Remove cached entries whose modification time is older than `days`
    /// days, returning the number removed. Entries still warm in the
    /// in-memory LRU are left there — only the on-disk tier is pruned.
    pub fn cleanup_older_than(&self, days: u64) -> std::io::Result<usize> {
        let threshold = std::time::SystemTime::now() - std::time::Duration::from_secs(days * 86_400);
        let mut count = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("npy") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if modified < threshold {
                std::fs::remove_file(entry.path())?;
                count += 1;
            }
        }
        Ok(count)
    }
}
