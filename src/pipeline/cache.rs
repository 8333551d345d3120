//! Disk-backed response cache.
//!
//! Responses are stored in `~/.ssage_cache/<sha256-of-prompt>.json` and
//! replayed for identical prompts until they are older than the TTL. Every
//! disk operation is best-effort: when the filesystem misbehaves the cache
//! turns into a transparent pass-through and the request goes to the backend.
//!
//! Commands in the skip list always bypass the cache. `tip` sends the same
//! prompt every time but should produce a different answer on each run.

use super::{Handler, Middleware, Request, StreamHandler};
use crate::clock::{Clock, SystemClock};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CACHE_DIR_NAME: &str = ".ssage_cache";
const ENTRY_EXTENSION: &str = "json";

/// On-disk representation of one cached response.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    response: String,
    created_at: DateTime<Utc>,
}

/// Prompt-keyed cache middleware with a TTL and a command skip list.
#[derive(Clone)]
pub struct DiskCache {
    dir: PathBuf,
    ttl: Duration,
    skip_commands: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl DiskCache {
    /// Creates a cache in the per-user cache directory.
    pub fn new(ttl: Duration, skip_commands: &[&str]) -> Self {
        Self::with_dir(default_cache_dir(), ttl, skip_commands)
    }

    /// Creates a cache rooted at `dir`.
    ///
    /// If the directory cannot be created, reads miss and writes are dropped.
    pub fn with_dir(dir: impl Into<PathBuf>, ttl: Duration, skip_commands: &[&str]) -> Self {
        let dir = dir.into();
        if let Err(e) = create_private_dir(&dir) {
            debug!("Cache directory {:?} unavailable: {}", dir, e);
        }
        Self {
            dir,
            ttl,
            skip_commands: skip_commands.iter().map(|c| c.to_string()).collect(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for TTL checks (for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lowercase hex SHA-256 of `prompt`.
    pub fn key_for(prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    fn skips(&self, request: &Request) -> bool {
        self.skip_commands.contains(&request.command)
    }

    /// Returns the cached response under `key` if present and fresh.
    ///
    /// Stale entries are deleted on the way out.
    fn load(&self, key: &str) -> Option<String> {
        let path = self.entry_path(key);
        let content = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Ignoring malformed cache entry {:?}: {}", path, e);
                return None;
            }
        };

        // A timestamp from the future counts as fresh.
        let expired = (self.clock.now() - entry.created_at)
            .to_std()
            .map(|age| age > self.ttl)
            .unwrap_or(false);
        if expired {
            debug!("Evicting expired cache entry {}", key);
            let _ = fs::remove_file(&path);
            return None;
        }

        Some(entry.response)
    }

    fn store(&self, key: &str, response: &str) {
        let entry = CacheEntry {
            response: response.to_string(),
            created_at: self.clock.now(),
        };
        let result = serde_json::to_string_pretty(&entry)
            .map_err(io::Error::from)
            .and_then(|content| write_atomically(&self.dir, &self.entry_path(key), content.as_bytes()));
        match result {
            Ok(()) => debug!("Cached response under {}", key),
            Err(e) => debug!("Dropping cache write for {}: {}", key, e),
        }
    }
}

impl Middleware for DiskCache {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Cached {
            cache: self.clone(),
            next,
        })
    }

    fn wrap_stream(&self, next: Arc<dyn StreamHandler>) -> Arc<dyn StreamHandler> {
        Arc::new(Cached {
            cache: self.clone(),
            next,
        })
    }
}

struct Cached<H: ?Sized> {
    cache: DiskCache,
    next: Arc<H>,
}

#[async_trait]
impl Handler for Cached<dyn Handler> {
    async fn handle(&self, request: Request) -> Result<String> {
        if self.cache.skips(&request) {
            return self.next.handle(request).await;
        }

        let key = DiskCache::key_for(&request.prompt);
        if let Some(cached) = self.cache.load(&key) {
            info!(command = %request.command, "Cache hit");
            return Ok(cached);
        }

        let response = self.next.handle(request).await?;
        self.cache.store(&key, &response);
        Ok(response)
    }
}

#[async_trait]
impl StreamHandler for Cached<dyn StreamHandler> {
    async fn handle_stream(
        &self,
        request: Request,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String> {
        if self.cache.skips(&request) {
            return self.next.handle_stream(request, on_token).await;
        }

        let key = DiskCache::key_for(&request.prompt);
        if let Some(cached) = self.cache.load(&key) {
            info!(command = %request.command, "Cache hit");
            // Replayed as one chunk.
            on_token(&cached);
            return Ok(cached);
        }

        let response = self.next.handle_stream(request, on_token).await?;
        self.cache.store(&key, &response);
        Ok(response)
    }
}

/// `~/.ssage_cache`, or a directory under the system temp dir when there is
/// no home directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_DIR_NAME)
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Writes through a temp file and a rename so readers never see a partial
/// entry. The temp name carries the entry's file name, so concurrent writes of
/// different keys never share a temp file.
fn write_atomically(dir: &Path, path: &Path, data: &[u8]) -> io::Result<()> {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let tmp_path = dir.join(format!(".{}.{}.tmp", name, std::process::id()));
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = options
        .open(&tmp_path)
        .and_then(|mut file| file.write_all(data))
        .and_then(|()| fs::rename(&tmp_path, path));
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}
