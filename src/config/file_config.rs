use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Server settings (can override CLI)
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub backend_url: Option<String>,
    pub backend_timeout_sec: Option<u64>,

    // Serving core
    pub rate_limit_per_minute: Option<u32>,
    pub rate_limit_per_hour: Option<u32>,
    pub rate_limit_burst: Option<u32>,
    pub rate_limit_cooldown_secs: Option<u64>,
    pub cache_max_entries: Option<usize>,
    pub cache_default_ttl_secs: Option<u64>,
    pub stream_idle_timeout_secs: Option<u64>,
    pub session_max_idle_secs: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,

    /// Operations forwarded to the backend.
    pub tools: Vec<ToolConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cacheable: bool,
    /// Falls back to `cache_default_ttl_secs` when absent.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Parameter names that must be present in every call.
    #[serde(default)]
    pub required: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
port = 4100
logging_level = "headers"
backend_url = "http://localhost:9000"
rate_limit_per_minute = 30
rate_limit_cooldown_secs = 2
cache_default_ttl_secs = 60

[[tools]]
name = "screenplay.parse"
description = "Parse a screenplay"
cacheable = true
cache_ttl_secs = 600
required = ["path"]

[[tools]]
name = "scenes.search"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.port, Some(4100));
        assert_eq!(config.rate_limit_per_minute, Some(30));
        assert_eq!(config.rate_limit_cooldown_secs, Some(2));
        assert_eq!(config.cache_max_entries, None);
        assert_eq!(config.tools.len(), 2);
        assert_eq!(config.tools[0].required, vec!["path".to_string()]);
        assert_eq!(config.tools[0].cache_ttl_secs, Some(600));
        assert!(!config.tools[1].cacheable);
        assert_eq!(config.tools[1].description, "");
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = FileConfig::load(file.path()).unwrap();
        assert!(config.port.is_none());
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = FileConfig::load(Path::new("/nonexistent/toolhub.toml"));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to read config file"));
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "port = \"not a number\"").unwrap();
        let result = FileConfig::load(file.path());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }
}
