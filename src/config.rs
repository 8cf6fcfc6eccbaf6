//! Bridge configuration
//!
//! Loaded from TOML. Lookup order for the file: `--config`, then
//! `$RUNBRIDGE_CONFIG`, then `<config_dir>/runbridge/config.toml`. A missing
//! default file yields the default configuration, which has an empty
//! allow-list and therefore runs nothing.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:4444";

/// Default console scrollback, in lines
pub const DEFAULT_SCROLLBACK_LINES: usize = 5000;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "RUNBRIDGE_CONFIG";

/// Environment variable overriding `bind`
pub const BIND_ENV: &str = "RUNBRIDGE_BIND";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid bind address '{0}'")]
    InvalidBind(String),
    #[error("Duplicate script name '{0}'")]
    DuplicateScript(String),
    #[error("Script '{0}' has an empty path")]
    EmptyScriptPath(String),
    #[error("max_concurrent_runs must be greater than zero")]
    ZeroRunLimit,
}

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Socket address the HTTP/WebSocket server listens on
    pub bind: String,
    /// Kill a connection's running script when the connection drops
    pub kill_on_disconnect: bool,
    /// Upper bound on scripts running at once across all connections
    pub max_concurrent_runs: Option<usize>,
    /// Lines kept by the native console
    pub scrollback_lines: usize,
    /// tracing filter used when RUST_LOG is unset
    pub log_filter: Option<String>,
    /// Scripts clients are allowed to run
    pub scripts: Vec<ScriptEntry>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            kill_on_disconnect: true,
            max_concurrent_runs: None,
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            log_filter: None,
            scripts: Vec::new(),
        }
    }
}

/// One allow-listed script
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScriptEntry {
    /// Short name clients may use instead of the path
    pub name: String,
    /// Executable path, or a bare program name looked up on PATH
    pub path: String,
    #[serde(default)]
    pub description: String,
    /// Sub-functions accepted as the first argument
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl BridgeConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("runbridge").join("config.toml"))
    }

    /// Resolve and load the config.
    ///
    /// An explicitly named file (argument or environment) must exist. The
    /// default location is optional.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply `RUNBRIDGE_BIND`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var(BIND_ENV) {
            self.bind = bind;
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.max_concurrent_runs == Some(0) {
            return Err(ConfigError::ZeroRunLimit);
        }
        let mut seen = HashSet::new();
        for script in &self.scripts {
            if script.path.trim().is_empty() {
                return Err(ConfigError::EmptyScriptPath(script.name.clone()));
            }
            if !seen.insert(script.name.as_str()) {
                return Err(ConfigError::DuplicateScript(script.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_empty() {
        let config = BridgeConfig::from_toml_str("", Path::new("inline")).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(config.kill_on_disconnect);
        assert!(config.scripts.is_empty());
        assert_eq!(config.bind_addr().unwrap().port(), 4444);
    }

    #[test]
    fn test_parse_scripts() {
        let text = r#"
            bind = "0.0.0.0:9000"
            max_concurrent_runs = 4

            [[scripts]]
            name = "echo"
            path = "/bin/echo"
            description = "Print arguments"

            [[scripts]]
            name = "deploy"
            path = "/opt/tools/deploy.sh"
            functions = ["status", "rollout"]
            working_dir = "/opt/tools"
        "#;
        let config = BridgeConfig::from_toml_str(text, Path::new("inline")).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.max_concurrent_runs, Some(4));
        assert_eq!(config.scripts.len(), 2);
        assert_eq!(config.scripts[1].functions, vec!["status", "rollout"]);
        assert_eq!(config.scripts[1].working_dir, Some(PathBuf::from("/opt/tools")));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let text = r#"
            [[scripts]]
            name = "a"
            path = "/bin/true"
            [[scripts]]
            name = "a"
            path = "/bin/false"
        "#;
        let err = BridgeConfig::from_toml_str(text, Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateScript(name) if name == "a"));
    }

    #[test]
    fn test_rejects_bad_bind_and_zero_limit() {
        let err = BridgeConfig::from_toml_str("bind = \"nope\"", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBind(_)));

        let err =
            BridgeConfig::from_toml_str("max_concurrent_runs = 0", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroRunLimit));
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let err = BridgeConfig::from_toml_str("shell = true", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[scripts]]\nname = \"echo\"\npath = \"/bin/echo\"").unwrap();

        let config = BridgeConfig::discover(Some(file.path())).unwrap();
        assert_eq!(config.scripts[0].name, "echo");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = BridgeConfig::discover(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
