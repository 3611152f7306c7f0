use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    ConfigDirNotFound,

    #[error("home directory not found; set KUBEFORGE_HOME")]
    HomeDirNotFound,

    #[error(
        "cluster file not found. Looked in:\n\
        - KUBEFORGE_CLUSTER_FILE\n\
        - current directory: cluster.local.yaml, cluster.yaml\n\
        - ~/.config/kubeforge/cluster.yaml"
    )]
    ClusterFileNotFound,

    #[error("invalid cluster file: {0}")]
    Invalid(#[from] kubeforge_core::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
