//! Configuration file resolution and loading
//!
//! Both the configuration file and the asset root folder are resolved with the
//! same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Configuration file / platform location
//! 4. Compiled fallback

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used under the platform configuration directory
pub const APP_DIR_NAME: &str = "loopstation";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolve the configuration file path.
///
/// Returns an error if no candidate exists; an explicit CLI or environment path
/// is returned even if the file is missing so the caller reports the real path.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: platform locations
    for candidate in platform_config_candidates() {
        if candidate.exists() {
            debug!("Using config file {}", candidate.display());
            return Ok(candidate);
        }
    }

    Err(Error::Config(format!(
        "No config file found (pass --config or set {})",
        env_var_name
    )))
}

/// Candidate configuration files in lookup order
fn platform_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc").join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    candidates
}

/// Resolve the folder that relative asset URLs are read from.
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    PathBuf::from(".")
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    let value = toml::from_str(&content)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    #[serial]
    fn test_cli_arg_wins() {
        std::env::set_var("LOOPSTATION_TEST_CONFIG", "/from/env.toml");
        let path = resolve_config_path(Some(Path::new("/from/cli.toml")), "LOOPSTATION_TEST_CONFIG")
            .unwrap();
        assert_eq!(path, PathBuf::from("/from/cli.toml"));
        std::env::remove_var("LOOPSTATION_TEST_CONFIG");
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli() {
        std::env::set_var("LOOPSTATION_TEST_CONFIG", "/from/env.toml");
        let path = resolve_config_path(None, "LOOPSTATION_TEST_CONFIG").unwrap();
        assert_eq!(path, PathBuf::from("/from/env.toml"));
        std::env::remove_var("LOOPSTATION_TEST_CONFIG");
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        std::env::remove_var("LOOPSTATION_TEST_ROOT");
        assert_eq!(
            resolve_root_folder(None, "LOOPSTATION_TEST_ROOT", Some(Path::new("/cfg"))),
            PathBuf::from("/cfg")
        );
        assert_eq!(
            resolve_root_folder(None, "LOOPSTATION_TEST_ROOT", None),
            PathBuf::from(".")
        );

        std::env::set_var("LOOPSTATION_TEST_ROOT", "/env");
        assert_eq!(
            resolve_root_folder(None, "LOOPSTATION_TEST_ROOT", Some(Path::new("/cfg"))),
            PathBuf::from("/env")
        );
        assert_eq!(
            resolve_root_folder(Some(Path::new("/cli")), "LOOPSTATION_TEST_ROOT", None),
            PathBuf::from("/cli")
        );
        std::env::remove_var("LOOPSTATION_TEST_ROOT");
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        std::fs::write(&path, "name = \"piano\"\n").unwrap();

        let sample: Sample = load_toml(&path).unwrap();
        assert_eq!(sample.name, "piano");
        assert_eq!(sample.count, 0);
    }

    #[test]
    fn test_load_toml_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "name = ").unwrap();

        let result: Result<Sample> = load_toml(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_toml_missing_file() {
        let result: Result<Sample> = load_toml(Path::new("/nonexistent/loopstation.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
