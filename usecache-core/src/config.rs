//! Engine configuration.
//!
//! Values are layered with the `config` crate: an optional file first, then
//! `USECACHE__*` environment variables (`USECACHE__USE_CACHE_TIMEOUT_MS=1000`,
//! `USECACHE__PROFILES__BLOG__REVALIDATE=30`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::CacheError;
use crate::lifetimes::{CacheLife, BUILTIN_PROFILES};
use crate::EvictionPolicy;

/// Default wall-clock budget for filling a cache during a modern prerender.
pub const DEFAULT_USE_CACHE_TIMEOUT_MS: u64 = 50_000;
/// Entries expiring sooner than this are not worth prerendering.
pub const DEFAULT_DYNAMIC_EXPIRE_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub use_cache_timeout_ms: u64,
    pub dynamic_expire_secs: u64,
    /// Development mode: refresh salts and no-cache requests are honored.
    pub dev: bool,
    /// Entry limit of the in-memory backend.
    pub max_entries: Option<usize>,
    /// Memory limit of the in-memory backend, in bytes.
    pub max_memory: Option<usize>,
    pub eviction: EvictionPolicy,
    /// Named cache-life profiles; these override built-in profiles of the same name.
    pub profiles: HashMap<String, CacheLife>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_cache_timeout_ms: DEFAULT_USE_CACHE_TIMEOUT_MS,
            dynamic_expire_secs: DEFAULT_DYNAMIC_EXPIRE_SECS,
            dev: false,
            max_entries: None,
            max_memory: None,
            eviction: EvictionPolicy::default(),
            profiles: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Loads configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, CacheError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("USECACHE").separator("__"));

        let config: CacheConfig = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|err| CacheError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.use_cache_timeout_ms == 0 {
            return Err(CacheError::config("use_cache_timeout_ms must be positive"));
        }
        for (name, life) in &self.profiles {
            if life.revalidate > life.expire {
                return Err(CacheError::config(format!(
                    "cache profile `{name}`: expire ({}) must not be shorter than revalidate ({})",
                    life.expire, life.revalidate
                )));
            }
        }
        Ok(())
    }

    pub fn use_cache_timeout(&self) -> Duration {
        Duration::from_millis(self.use_cache_timeout_ms)
    }

    /// Resolves a profile by name, configured profiles first.
    pub fn profile(&self, name: &str) -> Option<CacheLife> {
        self.profiles
            .get(name)
            .copied()
            .or_else(|| BUILTIN_PROFILES.get(name).copied())
    }

    /// Budget a cache starts from before `cache_life` overrides it.
    pub fn default_life(&self) -> CacheLife {
        self.profile("default").unwrap_or(CacheLife::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.use_cache_timeout(), Duration::from_secs(50));
        assert_eq!(config.dynamic_expire_secs, 300);
        assert_eq!(config.default_life(), CacheLife::DEFAULT);
        assert_eq!(config.profile("hours"), Some(CacheLife::HOURS));
        assert_eq!(config.profile("nope"), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("usecache-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("usecache.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "use_cache_timeout_ms = 1000\neviction = \"fifo\"\nmax_entries = 10\n\n[profiles.blog]\nrevalidate = 30\nexpire = 600"
        )
        .unwrap();

        let config = CacheConfig::load(Some(&path)).unwrap();
        assert_eq!(config.use_cache_timeout_ms, 1_000);
        assert_eq!(config.eviction, EvictionPolicy::FIFO);
        assert_eq!(config.max_entries, Some(10));

        let blog = config.profile("blog").unwrap();
        assert_eq!(blog.revalidate, 30);
        assert_eq!(blog.expire, 600);
        assert_eq!(blog.stale, CacheLife::DEFAULT.stale);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = CacheConfig::load(Some(Path::new("/nonexistent/usecache.toml"))).unwrap();
        assert_eq!(config.use_cache_timeout_ms, DEFAULT_USE_CACHE_TIMEOUT_MS);
    }

    #[test]
    fn test_profile_validation() {
        let mut config = CacheConfig::default();
        config
            .profiles
            .insert("broken".to_string(), CacheLife::new(0, 100, 10));
        assert!(matches!(config.validate(), Err(CacheError::Config { .. })));
    }
}
