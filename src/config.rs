use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, optionally loaded from a TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ShellConfig {
    pub shell: PromptConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Print a prompt before reading each line.
    pub prompt: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl ShellConfig {
    /// Load a config file. Keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<ShellConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

// --- Default implementations ---

impl Default for PromptConfig {
    fn default() -> Self {
        Self { prompt: true }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ShellConfig::default();
        assert!(config.shell.prompt);
        assert_eq!(config.log.filter, "warn");
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[shell]\nprompt = false").unwrap();

        let config = ShellConfig::load(file.path()).unwrap();
        assert!(!config.shell.prompt);
        assert_eq!(config.log.filter, "warn");
    }

    #[test]
    fn test_load_log_filter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[log]\nfilter = \"jobsh=debug\"").unwrap();

        let config = ShellConfig::load(file.path()).unwrap();
        assert!(config.shell.prompt);
        assert_eq!(config.log.filter, "jobsh=debug");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = ShellConfig::load(Path::new("/nonexistent/jobsh.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/jobsh.toml"));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[shell]\nprompt = \"maybe\"").unwrap();

        let err = ShellConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
