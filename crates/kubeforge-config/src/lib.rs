pub mod cluster;
pub mod error;

pub use cluster::{ClusterSpec, HaNodes, ManagedNodes, NodePool};
pub use error::*;

use std::path::PathBuf;

/// Environment variable overriding the state/credential store root
pub const HOME_ENV: &str = "KUBEFORGE_HOME";

/// Environment variable pointing directly at a cluster file
pub const CLUSTER_FILE_ENV: &str = "KUBEFORGE_CLUSTER_FILE";

/// kubeforge's configuration directory (`~/.config/kubeforge`)
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("kubeforge");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Root of the local store
///
/// `$KUBEFORGE_HOME` when set, otherwise `~/.kubeforge`. The directory is not
/// created here; the store creates what it writes.
pub fn storage_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }

    dirs::home_dir()
        .map(|home| home.join(".kubeforge"))
        .ok_or(ConfigError::HomeDirNotFound)
}

/// Finds the cluster file to operate on
///
/// Search order:
/// 1. `KUBEFORGE_CLUSTER_FILE`
/// 2. current directory: `cluster.local.yaml`, `cluster.yaml`
/// 3. `~/.config/kubeforge/cluster.yaml`
pub fn find_cluster_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CLUSTER_FILE_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    for filename in ["cluster.local.yaml", "cluster.yaml"] {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("kubeforge").join("cluster.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::ClusterFileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("kubeforge"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_storage_root_env_override() {
        let temp_dir = tempfile::tempdir().unwrap();

        unsafe {
            std::env::set_var(HOME_ENV, temp_dir.path());
        }

        assert_eq!(storage_root().unwrap(), temp_dir.path());

        unsafe {
            std::env::remove_var(HOME_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_storage_root_default() {
        unsafe {
            std::env::remove_var(HOME_ENV);
        }

        let root = storage_root().unwrap();
        assert!(root.ends_with(".kubeforge"));
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("cluster.yaml"), "# shared").unwrap();
        fs::write(temp_dir.path().join("cluster.local.yaml"), "# local").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_cluster_file().unwrap();
        assert!(result.ends_with("cluster.local.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "# custom").unwrap();

        unsafe {
            std::env::set_var(CLUSTER_FILE_ENV, config_path.to_str().unwrap());
        }

        let result = find_cluster_file().unwrap();
        assert_eq!(result, config_path);

        unsafe {
            std::env::remove_var(CLUSTER_FILE_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_cluster_file();
        // A global cluster file on the developer machine would satisfy the lookup.
        let has_global = dirs::config_dir()
            .map(|d| d.join("kubeforge").join("cluster.yaml").exists())
            .unwrap_or(false);
        if !has_global {
            assert!(matches!(result, Err(ConfigError::ClusterFileNotFound)));
        }

        std::env::set_current_dir(original_dir).unwrap();
    }
}
