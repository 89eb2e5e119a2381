//! On-disk result cache keyed by request and validated by file mtimes.
//!
//! Each entry is a JSON file named by `sha1(identifier + "\n" + request)`.
//! It records the request it was stored for, the files (and directories)
//! the result depended on with their modification times, and an opaque
//! result. A read re-stats every dependency; a changed mtime, a missing file
//! or an unreadable entry is a miss.
//!
//! All stat fan-out runs through [`bounded_map`], which caps the number of
//! in-flight filesystem calls so pages with many dependencies do not exhaust
//! file descriptors.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, trace};

/// Default cap on simultaneous stat calls.
pub const DEFAULT_STAT_CONCURRENCY: usize = 20;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache entry {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("stat task failed: {0}")]
    Join(#[from] JoinError),
}

/// A file the cached result depended on, with its mtime in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub path: PathBuf,
    pub mtime: u64,
}

/// One stored cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub request: String,
    pub dependencies: Vec<Dependency>,
    pub context_dependencies: Vec<Dependency>,
    pub result: Value,
}

/// What a successful [`DiskCache::write`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// A dependency changed after the work started; storing would cache a
    /// result that may already be stale.
    Skipped,
    ReadOnly,
}

/// A directory of cache entries.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use ssrv::cache::DiskCache;
///
/// # async fn demo() -> Result<(), ssrv::cache::CacheError> {
/// let cache = DiskCache::new("/tmp/ssrv-cache", "ssrv 0.1.0 development");
/// let started = std::time::SystemTime::now();
/// cache
///     .write(
///         "pages/index.js",
///         &[PathBuf::from("pages/index.js")],
///         &[],
///         serde_json::json!("compiled"),
///         started,
///     )
///     .await?;
/// assert!(cache.read("pages/index.js").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    identifier: String,
    concurrency: usize,
    precision_ms: u64,
    read_only: bool,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>, identifier: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            identifier: identifier.into(),
            concurrency: DEFAULT_STAT_CONCURRENCY,
            precision_ms: 0,
            read_only: false,
        }
    }

    /// Caps simultaneous stat calls; `0` is treated as `1`.
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Rounds mtimes down to this many milliseconds before comparing.
    #[must_use]
    pub fn with_precision(mut self, precision_ms: u64) -> Self {
        self.precision_ms = precision_ms;
        self
    }

    /// A read-only cache never writes and trusts entries whose
    /// dependencies still exist.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Path of the entry for `request`.
    pub fn key_path(&self, request: &str) -> PathBuf {
        let mut hasher = Sha1::new();
        hasher.update(self.identifier.as_bytes());
        hasher.update(b"\n");
        hasher.update(request.as_bytes());
        let hex: String = hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        self.dir.join(format!("{hex}.json"))
    }

    /// Returns the cached result for `request` if every dependency is unchanged.
    ///
    /// # Errors
    ///
    /// Only a panicked stat task is an error; everything else is a miss.
    pub async fn read(&self, request: &str) -> Result<Option<Value>, CacheError> {
        let path = self.key_path(request);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                trace!(path = %path.display(), error = %err, "cache miss");
                return Ok(None);
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "corrupt cache entry");
                return Ok(None);
            }
        };
        if entry.request != request {
            return Ok(None);
        }

        let recorded: Vec<Dependency> = entry
            .dependencies
            .iter()
            .chain(&entry.context_dependencies)
            .cloned()
            .collect();
        let paths: Vec<PathBuf> = recorded.iter().map(|dep| dep.path.clone()).collect();
        let current = bounded_map(paths, self.concurrency, |p| async move { mtime_ms(&p).await }).await?;

        for (dep, now) in recorded.iter().zip(current) {
            let Ok(now) = now else {
                debug!(path = %dep.path.display(), "cache dependency is gone");
                return Ok(None);
            };
            if !self.read_only && self.round(now) != self.round(dep.mtime) {
                debug!(path = %dep.path.display(), "cache dependency changed");
                return Ok(None);
            }
        }
        Ok(Some(entry.result))
    }

    /// Stores `result` for `request`.
    ///
    /// `started` is when the work producing `result` began; if any
    /// dependency was modified in or after that second the entry is not
    /// stored.
    ///
    /// # Errors
    ///
    /// [`CacheError::Stat`] if a dependency cannot be stat'ed,
    /// [`CacheError::Write`] if the entry cannot be written.
    pub async fn write(
        &self,
        request: &str,
        dependencies: &[PathBuf],
        context_dependencies: &[PathBuf],
        result: Value,
        started: SystemTime,
    ) -> Result<WriteOutcome, CacheError> {
        if self.read_only {
            return Ok(WriteOutcome::ReadOnly);
        }

        let dependencies = self.stat_all(dependencies).await?;
        let context_dependencies = self.stat_all(context_dependencies).await?;

        let started_secs = millis_since_epoch(started) / 1000;
        let touched = dependencies
            .iter()
            .chain(&context_dependencies)
            .any(|dep| dep.mtime / 1000 >= started_secs);
        if touched {
            debug!(request, "dependency changed during build; not caching");
            return Ok(WriteOutcome::Skipped);
        }

        let entry = CacheEntry {
            request: request.to_owned(),
            dependencies,
            context_dependencies,
            result,
        };
        let encoded = serde_json::to_string(&entry)?;
        let path = self.key_path(request);

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CacheError::Write {
                path: self.dir.clone(),
                source,
            })?;
        fs::write(&path, encoded)
            .await
            .map_err(|source| CacheError::Write {
                path: path.clone(),
                source,
            })?;
        trace!(path = %path.display(), "cache entry stored");
        Ok(WriteOutcome::Stored)
    }

    async fn stat_all(&self, paths: &[PathBuf]) -> Result<Vec<Dependency>, CacheError> {
        let stats = bounded_map(paths.to_vec(), self.concurrency, |p| async move {
            let mtime = mtime_ms(&p).await;
            (p, mtime)
        })
        .await?;

        stats
            .into_iter()
            .map(|(path, mtime)| match mtime {
                Ok(mtime) => Ok(Dependency { path, mtime }),
                Err(source) => Err(CacheError::Stat { path, source }),
            })
            .collect()
    }

    fn round(&self, mtime: u64) -> u64 {
        if self.precision_ms > 1 {
            mtime - mtime % self.precision_ms
        } else {
            mtime
        }
    }
}

async fn mtime_ms(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path).await?.modified()?;
    Ok(millis_since_epoch(modified))
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Runs `f` over `items` with at most `limit` futures in flight.
///
/// Every task is joined before returning; results keep the input order.
///
/// # Errors
///
/// Returns the [`JoinError`] of the first task that panicked.
pub async fn bounded_map<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Result<Vec<R>, JoinError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    let len = items.len();

    for (idx, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let work = f(item);
        tasks.spawn(async move {
            // The semaphore is never closed, so acquiring only waits.
            let _permit = semaphore.acquire_owned().await;
            (idx, work.await)
        });
    }

    let mut slots: Vec<Option<R>> = (0..len).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (idx, value) = joined?;
        slots[idx] = Some(value);
    }
    Ok(slots.into_iter().flatten().collect())
}
