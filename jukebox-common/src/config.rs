//! Bootstrap configuration file resolution
//!
//! Config file lookup follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/jukebox/config.toml`)
//! 4. System config file (`/etc/jukebox/config.toml`)
//!
//! Returning `None` means no file was found and built-in defaults apply.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Name of the directory holding jukebox configuration
const CONFIG_DIR_NAME: &str = "jukebox";

/// Resolve the bootstrap config file path
///
/// An explicit path (CLI or environment) is returned even if it does not exist,
/// so the caller can report it. Discovered default locations are only returned
/// when the file is present.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
}

/// Candidate config locations for the current platform, most specific first
pub fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(CONFIG_DIR_NAME).join("config.toml"));
    }

    if cfg!(unix) {
        candidates.push(PathBuf::from("/etc").join(CONFIG_DIR_NAME).join("config.toml"));
    }

    candidates
}

/// Read and parse a TOML file into `T`
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Default data directory for the sqlite database
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(CONFIG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./jukebox_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        port: u16,
        #[serde(default)]
        name: Option<String>,
    }

    #[test]
    fn test_cli_path_wins() {
        let path = PathBuf::from("/tmp/does-not-matter.toml");
        let resolved = resolve_config_path(Some(&path), "JUKEBOX_TEST_UNSET_VAR");
        assert_eq!(resolved, Some(path));
    }

    #[test]
    fn test_load_toml_parses_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 5800").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(sample.port, 5800);
        assert!(sample.name.is_none());
    }

    #[test]
    fn test_load_toml_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let err = load_toml::<Sample>(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_toml_missing_file_is_io_error() {
        let err = load_toml::<Sample>(Path::new("/nonexistent/jukebox.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
