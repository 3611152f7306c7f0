//! kind CLI wrapper

use crate::error::{LocalError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const KIND_BIN_ENV: &str = "KUBEFORGE_KIND_BIN";
pub const NODE_IMAGE: &str = "kindest/node";

/// How long `kind create cluster` waits for the control plane
pub const WAIT: &str = "50s";

pub struct Kind {
    binary: PathBuf,
}

impl Default for Kind {
    fn default() -> Self {
        let binary = std::env::var(KIND_BIN_ENV)
            .ok()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "kind".to_string());
        Self::new(binary)
    }
}

/// Cluster config with one control plane and `nodes - 1` workers
pub fn cluster_config(nodes: usize, disable_default_cni: bool) -> String {
    let mut config = String::from("kind: Cluster\napiVersion: kind.x-k8s.io/v1alpha4\n");
    if disable_default_cni {
        config.push_str("networking:\n  disableDefaultCNI: true\n");
    }
    config.push_str("nodes:\n- role: control-plane\n");
    for _ in 1..nodes.max(1) {
        config.push_str("- role: worker\n");
    }
    config
}

pub fn node_image(version: &str) -> String {
    format!("{NODE_IMAGE}:v{}", version.trim_start_matches('v'))
}

impl Kind {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Fails with `KindNotFound` when the binary cannot be run
    pub async fn version(&self) -> Result<String> {
        let output = self.run(&["version"], None).await?;
        Ok(output.trim().to_string())
    }

    /// Run a kind command, optionally feeding `stdin`, and return stdout
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} {}", self.binary.display(), args.join(" "));

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LocalError::KindNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LocalError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn create_cluster(&self, name: &str, config: &str, image: &str) -> Result<()> {
        self.run(
            &[
                "create", "cluster", "--name", name, "--config", "-", "--image", image, "--wait",
                WAIT,
            ],
            Some(config),
        )
        .await?;
        Ok(())
    }

    pub async fn list_clusters(&self) -> Result<Vec<String>> {
        let output = self.run(&["get", "clusters"], None).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("No kind clusters"))
            .map(str::to_string)
            .collect())
    }

    pub async fn kubeconfig(&self, name: &str) -> Result<String> {
        if !self.list_clusters().await?.iter().any(|c| c == name) {
            return Err(LocalError::ClusterNotFound(name.to_string()));
        }
        self.run(&["get", "kubeconfig", "--name", name], None).await
    }

    /// Deleting a missing cluster succeeds
    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        self.run(&["delete", "cluster", "--name", name], None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_config() {
        let single = cluster_config(1, false);
        assert!(single.contains("- role: control-plane"));
        assert!(!single.contains("worker"));

        let three = cluster_config(3, true);
        assert_eq!(three.matches("- role: worker").count(), 2);
        assert!(three.contains("disableDefaultCNI: true"));
    }

    #[test]
    fn test_node_image() {
        assert_eq!(node_image("1.30.0"), "kindest/node:v1.30.0");
        assert_eq!(node_image("v1.29.4"), "kindest/node:v1.29.4");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let kind = Kind::new("/nonexistent/kubeforge-kind");
        assert!(matches!(kind.version().await, Err(LocalError::KindNotFound)));
    }
}
