use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::RankingRun;
use crate::fingerprint::CacheKey;

const CACHE_VERSION: u32 = 1;
const CACHE_DIR: &str = "powerscore";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRun {
    version: u32,
    key: CacheKey,
    written_at: u64,
    run: RankingRun,
}

/// Finished runs on disk, one JSON file per combined cache key.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_CACHE_HOME/powerscore`, else `~/.cache/powerscore`.
    pub fn default_location() -> Option<Self> {
        if let Ok(base) = std::env::var("XDG_CACHE_HOME")
            && !base.trim().is_empty()
        {
            return Some(Self::at(PathBuf::from(base).join(CACHE_DIR)));
        }
        let home = std::env::var("HOME").ok()?;
        if home.trim().is_empty() {
            return None;
        }
        Some(Self::at(PathBuf::from(home).join(".cache").join(CACHE_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.combined()))
    }

    /// Only returns a run stored under exactly this key; stale or foreign
    /// files read as a miss.
    pub fn load(&self, key: &CacheKey) -> Option<RankingRun> {
        let path = self.path_for(key);
        let raw = fs::read_to_string(&path).ok()?;
        let cached = serde_json::from_str::<CachedRun>(&raw).ok()?;
        if cached.version != CACHE_VERSION || cached.key != *key || cached.run.cache_key != *key {
            debug!(path = %path.display(), "ignoring mismatched cache entry");
            return None;
        }
        Some(cached.run)
    }

    pub fn store(&self, run: &RankingRun) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir {}", self.dir.display()))?;
        let path = self.path_for(&run.cache_key);
        let entry = CachedRun {
            version: CACHE_VERSION,
            key: run.cache_key.clone(),
            written_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            run: run.clone(),
        };
        let json = serde_json::to_string(&entry).context("serialize cached run")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("swap {}", path.display()))?;
        Ok(path)
    }
}
