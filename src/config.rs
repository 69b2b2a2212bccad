//! Configuration for eventchain.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (EVENTCHAIN_HOME, EVENTCHAIN_DATABASE,
//!    EVENTCHAIN_MARKER, EVENTCHAIN_LOG_FILE)
//! 2. Config file (.eventchain/config.yaml)
//! 3. Defaults (~/.eventchain)
//!
//! Config file discovery:
//! - Searches current directory and parents for .eventchain/config.yaml
//! - `paths.home` is relative to the .eventchain/ directory; other paths are
//!   relative to the project root (the directory containing .eventchain/)
//!
//! The resolved config is a plain value handed to bootstrap code. The run
//! deadline is fixed and deliberately absent here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::bus::memory::DEFAULT_CHANNEL_CAPACITY;

const CONFIG_DIR: &str = ".eventchain";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .eventchain/)
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
    /// Interrupt marker file
    pub marker: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Append-only log file, in addition to stderr
    pub file: Option<String>,
    /// Default tracing filter when RUST_LOG is unset
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber buffer of the in-process bus
    pub channel_capacity: Option<usize>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// Result database
    pub database: PathBuf,
    /// Interrupt marker file
    pub marker: PathBuf,
    /// Optional log file
    pub log_file: Option<PathBuf>,
    /// Default log filter
    pub log_filter: String,
    /// In-process bus buffer size
    pub bus_capacity: usize,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            database: home.join("events.db"),
            marker: home.join("interrupts.marker"),
            log_file: None,
            log_filter: "info".to_string(),
            bus_capacity: DEFAULT_CHANNEL_CAPACITY,
            config_file: None,
            home,
        }
    }

    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR);

        match find_config_file() {
            Some(path) => {
                let file = load_config_file(&path)?;
                Ok(resolve(file, Some(path), default_home, &env_lookup))
            }
            None => Ok(resolve(ConfigFile::default(), None, default_home, &env_lookup)),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Merge file settings, environment and defaults
fn resolve(
    file: ConfigFile,
    config_path: Option<PathBuf>,
    default_home: PathBuf,
    env: &dyn Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    // .eventchain/ and the project root above it
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);
    let base_dir = config_dir
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let home = if let Some(env_home) = env("EVENTCHAIN_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(dir), Some(home)) = (&config_dir, &file.paths.home) {
        resolve_path(dir, home)
    } else {
        default_home
    };

    let mut config = ResolvedConfig::with_home(home);

    if let Some(db) = env("EVENTCHAIN_DATABASE") {
        config.database = PathBuf::from(db);
    } else if let Some(ref db) = file.paths.database {
        config.database = resolve_path(&base_dir, db);
    }

    if let Some(marker) = env("EVENTCHAIN_MARKER") {
        config.marker = PathBuf::from(marker);
    } else if let Some(ref marker) = file.paths.marker {
        config.marker = resolve_path(&base_dir, marker);
    }

    config.log_file = env("EVENTCHAIN_LOG_FILE")
        .map(PathBuf::from)
        .or_else(|| file.logging.file.as_ref().map(|f| resolve_path(&base_dir, f)));

    if let Some(filter) = file.logging.filter {
        config.log_filter = filter;
    }
    if let Some(capacity) = file.bus.channel_capacity {
        config.bus_capacity = capacity.max(1);
    }

    config.config_file = config_path;
    config
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(ConfigFile::default(), None, PathBuf::from("/u/.eventchain"), &no_env);

        assert_eq!(config.home, PathBuf::from("/u/.eventchain"));
        assert_eq!(config.database, PathBuf::from("/u/.eventchain/events.db"));
        assert_eq!(config.marker, PathBuf::from("/u/.eventchain/interrupts.marker"));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.bus_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
  database: data/events.db
logging:
  file: internal/logs/nats.log
  filter: debug
bus:
  channel_capacity: 16
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        let config = resolve(parsed, Some(config_path.clone()), PathBuf::from("/unused"), &no_env);

        assert_eq!(config.home, config_dir.join("./state"));
        assert_eq!(config.database, temp.path().join("data/events.db"));
        assert_eq!(config.marker, config_dir.join("./state").join("interrupts.marker"));
        assert_eq!(config.log_file, Some(temp.path().join("internal/logs/nats.log")));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.bus_capacity, 16);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("EVENTCHAIN_HOME", "/env/home"),
            ("EVENTCHAIN_MARKER", "/env/marker"),
        ]
        .into_iter()
        .collect();
        let env = |key: &str| vars.get(key).map(|v| v.to_string());

        let file = ConfigFile {
            paths: PathsConfig {
                home: Some("ignored".into()),
                marker: Some("ignored.marker".into()),
                database: None,
            },
            ..Default::default()
        };
        let config = resolve(
            file,
            Some(PathBuf::from("/project/.eventchain/config.yaml")),
            PathBuf::from("/default"),
            &env,
        );

        assert_eq!(config.home, PathBuf::from("/env/home"));
        assert_eq!(config.marker, PathBuf::from("/env/marker"));
        assert_eq!(config.database, PathBuf::from("/env/home/events.db"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
