use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::store::CodeSource;

/// Lowercase hex SHA-256 of deployed source.
#[must_use]
pub fn content_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Source and hash of a workspace's deployed code. Both are empty when
/// nothing is deployed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedCode {
    pub source: Arc<str>,
    pub hash: String,
}

impl LoadedCode {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty()
    }
}

/// Caching front for a [`CodeSource`].
///
/// Entries live for `ttl`, so an update without an explicit `invalidate`
/// still becomes visible once the entry ages out.
pub struct CodeLoader {
    source: Arc<dyn CodeSource>,
    ttl: Duration,
    cache: Mutex<HashMap<String, (LoadedCode, Instant)>>,
}

impl CodeLoader {
    pub fn new(source: Arc<dyn CodeSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_code(&self, workspace_id: &str) -> Result<LoadedCode> {
        if let Some((code, loaded_at)) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(workspace_id)
        {
            if loaded_at.elapsed() < self.ttl {
                return Ok(code.clone());
            }
        }

        let code = match self.source.get_code(workspace_id)? {
            Some((source, hash)) => LoadedCode {
                source: source.into(),
                hash,
            },
            None => LoadedCode::default(),
        };

        if !self.ttl.is_zero() {
            self.cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(workspace_id.to_string(), (code.clone(), Instant::now()));
        }
        Ok(code)
    }

    pub fn current_hash(&self, workspace_id: &str) -> Result<String> {
        Ok(self.get_code(workspace_id)?.hash)
    }

    pub fn invalidate(&self, workspace_id: &str) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(workspace_id);
    }
}
