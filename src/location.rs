//! Location file index
//!
//! Keeps a short-lived cache of the `.loc` / `.loc.sample` files found under
//! the data root so that resolving many table files does not walk the
//! filesystem every time.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use tracing::{debug, error};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const PATTERNS: [&str; 2] = ["**/*.loc", "**/*.loc.sample"];

#[derive(Debug, Default)]
struct Cache {
    files: HashSet<PathBuf>,
    updated: Option<Instant>,
}

#[derive(Debug)]
pub struct LocationIndex {
    root: PathBuf,
    refresh_interval: Duration,
    cache: Mutex<Cache>,
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_owned())
}

fn scan(root: &Path) -> HashSet<PathBuf> {
    let escaped = glob::Pattern::escape(&root.to_string_lossy());
    let mut files = HashSet::new();
    for pattern in PATTERNS {
        let pattern = format!("{escaped}/{pattern}");
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(error) => {
                error!(%error, %pattern, "Failed to scan tool data path");
                return HashSet::new();
            }
        };
        for entry in paths {
            match entry {
                Ok(path) if path.exists() => {
                    files.insert(path);
                }
                Ok(_) => {}
                Err(error) => debug!(%error, "Skipping unreadable entry"),
            }
        }
    }
    files
}

impl LocationIndex {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: absolute(root.as_ref()),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the data root again regardless of cache age.
    pub fn refresh(&self) {
        let files = scan(&self.root);
        debug!(root = %self.root.display(), count = files.len(), "Scanned tool data path");
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.files = files;
        cache.updated = Some(Instant::now());
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let path = absolute(path.as_ref());
        let stale = {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache
                .updated
                .is_none_or(|updated| updated.elapsed() > self.refresh_interval)
        };
        if stale {
            self.refresh();
        }
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .contains(&path);
        cached || path.exists()
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .len()
    }
}
