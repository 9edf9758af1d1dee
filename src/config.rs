//! Runtime configuration for the engine: storage backend, result cache,
//! watch scheduling, push limits and the HTTP server address. All sections
//! are plain serde structs with sensible defaults so a zero-config start
//! works out of the box.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// One year, the upper bound for a watch timeout.
pub const MAX_WATCH_TIMEOUT_MILLIS: u64 = 365 * 24 * 60 * 60 * 1000;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DogmaConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:36462".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for file-backed repositories. Ignored by the in-memory
    /// backend used in tests.
    pub root: PathBuf,
    /// When true, every repository's objects are AES-GCM-SIV encrypted at
    /// rest with a per-repository DEK.
    pub encrypt_at_rest: bool,
    /// When true, repositories live only in process memory.
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dogma_data"),
            encrypt_at_rest: false,
            in_memory: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// Maximum total weight of cached results, e.g. "64M" or a byte count.
    #[serde(deserialize_with = "string_or_usize")]
    pub max_weight: String,
    /// Number of lock stripes for get-or-compute de-duplication.
    pub stripes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_weight: "64M".to_string(),
            stripes: 64,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WatchConfig {
    /// Bound on concurrently running watch query evaluations.
    pub eval_workers: usize,
    /// Cap applied to caller-supplied watch timeouts.
    pub max_timeout_millis: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            eval_workers: num_cpus::get(),
            max_timeout_millis: MAX_WATCH_TIMEOUT_MILLIS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PushConfig {
    /// Maximum number of changes accepted in a single push.
    pub max_changes: usize,
    /// Maximum total content bytes accepted in a single push, e.g. "8M".
    #[serde(deserialize_with = "string_or_usize")]
    pub max_content_bytes: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            max_changes: 1000,
            max_content_bytes: "8M".to_string(),
        }
    }
}

/// Parse a human-friendly size string ("64M", "2G", "1024") into bytes.
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, ""),
    };
    let value: usize = digits.parse().ok()?;
    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

fn string_or_usize<'deserialize, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'deserialize>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrUSize {
        String(String),
        USize(usize),
    }

    Ok(match StringOrUSize::deserialize(deserializer)? {
        StringOrUSize::String(v) => v,
        StringOrUSize::USize(v) => v.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Size strings parse with and without unit suffixes.
    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("64M"), Some(64 << 20));
        assert_eq!(parse_size("2G"), Some(2 << 30));
        assert_eq!(parse_size("16KB"), Some(16 << 10));
        assert_eq!(parse_size("weird"), None);
        assert_eq!(parse_size(""), None);
    }

    /// Cache weight accepts both a bare number and a size string in config.
    #[test]
    fn test_string_or_usize() {
        let cfg: CacheConfig =
            serde_json::from_str(r#"{"max_weight": 1048576, "stripes": 8}"#).unwrap();
        assert_eq!(cfg.max_weight, "1048576");
        let cfg: CacheConfig =
            serde_json::from_str(r#"{"max_weight": "64M", "stripes": 8}"#).unwrap();
        assert_eq!(parse_size(&cfg.max_weight), Some(64 << 20));
    }

    /// Defaults produce a usable zero-config setup.
    #[test]
    fn test_defaults() {
        let cfg = DogmaConfig::default();
        assert!(cfg.server.bind_addr.ends_with(":36462"));
        assert!(parse_size(&cfg.cache.max_weight).is_some());
        assert!(cfg.watch.eval_workers >= 1);
        assert_eq!(cfg.watch.max_timeout_millis, MAX_WATCH_TIMEOUT_MILLIS);
    }
}
