//! Profile discovery: every `*.ovpn` file directly inside the config directory.

use std::path::Path;

use anyhow::{Context, Result};
use supervision::EndpointConfig;

const PROFILE_EXTENSION: &str = "ovpn";

/// List endpoint profiles in `dir`, sorted by path. Subdirectories are not scanned.
pub fn discover_configs(dir: &Path) -> Result<Vec<EndpointConfig>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read config directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == PROFILE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths.into_iter().map(EndpointConfig::from_path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_only_ovpn_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("zurich.ovpn"), "client\n").unwrap();
        fs::write(dir.path().join("amsterdam.ovpn"), "client\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();
        fs::write(dir.path().join("backup.ovpn.bak"), "client\n").unwrap();
        fs::create_dir(dir.path().join("nested.ovpn")).unwrap();
        fs::write(dir.path().join("nested.ovpn").join("inner.ovpn"), "client\n").unwrap();

        let configs = discover_configs(dir.path()).unwrap();
        let names: Vec<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["amsterdam", "zurich"]);
        assert_eq!(configs[0].path, dir.path().join("amsterdam.ovpn"));
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_configs(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_configs(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config directory"));
    }
}
