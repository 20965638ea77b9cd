use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};
use crate::store::WorkspaceDirectory;
use crate::types::Workspace;
use crate::validation::validate_slug;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

type Cache = HashMap<String, (Option<Workspace>, Instant)>;

/// Maps public slugs to published workspaces.
///
/// Lookups are cached for `ttl`, including misses, so a burst of requests
/// for an unknown slug does not reach the directory every time. Malformed
/// slugs are never looked up or cached, and the cache holds at most
/// `max_entries` slugs.
pub struct RuntimeResolver {
    directory: Arc<dyn WorkspaceDirectory>,
    ttl: Duration,
    max_entries: usize,
    cache: Mutex<Cache>,
}

impl RuntimeResolver {
    pub fn new(directory: Arc<dyn WorkspaceDirectory>, ttl: Duration) -> Self {
        Self {
            directory,
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Returns the workspace for `slug` if it is published.
    pub fn resolve(&self, slug: &str) -> Result<Workspace> {
        if validate_slug(slug).is_err() {
            return Err(Error::NotFound(format!("workspace {slug}")));
        }

        let cached = self
            .lock()
            .get(slug)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(ws, _)| ws.clone());

        let found = match cached {
            Some(found) => found,
            None => {
                let found = self
                    .directory
                    .find_by_slug(slug)?
                    .filter(Workspace::is_published);
                debug!(slug, published = found.is_some(), "resolved workspace");
                if !self.ttl.is_zero() {
                    self.remember(slug, found.clone());
                }
                found
            }
        };

        found.ok_or_else(|| Error::NotFound(format!("workspace {slug}")))
    }

    /// Inserts a lookup, making room first by dropping expired entries and
    /// then the oldest one.
    fn remember(&self, slug: &str, found: Option<Workspace>) {
        let mut cache = self.lock();
        if !cache.contains_key(slug) && cache.len() >= self.max_entries {
            cache.retain(|_, (_, at)| at.elapsed() < self.ttl);
            while cache.len() >= self.max_entries {
                let Some(oldest) = cache
                    .iter()
                    .min_by_key(|(_, (_, at))| *at)
                    .map(|(key, _)| key.clone())
                else {
                    break;
                };
                cache.remove(&oldest);
            }
        }
        cache.insert(slug.to_string(), (found, Instant::now()));
    }

    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.lock().len()
    }

    pub fn forget(&self, slug: &str) {
        self.lock().remove(slug);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
