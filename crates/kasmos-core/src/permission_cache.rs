//! Persistent "allow always" decisions for harness permission prompts.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::RwLock;

const PERMISSION_CACHE_FILE: &str = "permission-cache.json";
const ALLOW_ALWAYS: &str = "allow_always";

/// Cache of permission patterns the user has approved permanently.
/// Shared between the update loop and the metadata tick, hence the lock.
#[derive(Debug)]
pub struct PermissionCache {
    patterns: RwLock<HashMap<String, String>>,
    dir: PathBuf,
}

impl PermissionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
            dir: dir.into(),
        }
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(PERMISSION_CACHE_FILE)
    }

    /// Reads the cache from disk. A missing file is an empty cache, not an
    /// error.
    pub fn load(&self) -> io::Result<()> {
        let data = match fs::read(self.cache_path()) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        let parsed: HashMap<String, String> = serde_json::from_slice(&data)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let mut patterns = self.patterns.write().unwrap_or_else(|poison| poison.into_inner());
        *patterns = parsed;
        Ok(())
    }

    /// Writes the cache to disk, creating the directory if needed.
    pub fn save(&self) -> io::Result<()> {
        let rendered = {
            let patterns = self.patterns.read().unwrap_or_else(|poison| poison.into_inner());
            serde_json::to_vec_pretty(&*patterns)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?
        };

        fs::create_dir_all(&self.dir)?;
        fs::write(self.cache_path(), rendered)
    }

    pub fn is_allowed_always(&self, pattern: &str) -> bool {
        let patterns = self.patterns.read().unwrap_or_else(|poison| poison.into_inner());
        patterns.get(pattern).map(String::as_str) == Some(ALLOW_ALWAYS)
    }

    pub fn remember(&self, pattern: &str) {
        let mut patterns = self.patterns.write().unwrap_or_else(|poison| poison.into_inner());
        patterns.insert(pattern.to_string(), ALLOW_ALWAYS.to_string());
    }
}

/// Returns a non-empty cache key for a permission prompt. Prefers the
/// pattern (e.g. `"/opt/*"`); falls back to the description so prompt types
/// without a patterns section can still be cached.
pub fn cache_key<'a>(pattern: &'a str, description: &'a str) -> &'a str {
    if pattern.is_empty() {
        description
    } else {
        pattern
    }
}
