use colored::Colorize;
use kubeforge_cloud::{ClusterMeta, ClusterPlan, ClusterSummary, HaPlan, ManagedPlan, NodePlan};
use kubeforge_config::{ClusterSpec, NodePool};
use kubeforge_core::ClusterType;
use kubeforge_storage::{LocalStore, StorageDriver};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Loads the cluster file given with `-f`, or the one found by the usual lookup
pub fn load_spec(file: Option<&Path>) -> anyhow::Result<(PathBuf, ClusterSpec)> {
    let path = match file {
        Some(path) => path.to_path_buf(),
        None => kubeforge_config::find_cluster_file()?,
    };
    let spec = ClusterSpec::load(&path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    Ok((path, spec))
}

pub fn print_loaded_cluster_file(path: &Path) {
    println!("📄 Cluster file: {}", path.display().to_string().cyan());
}

pub fn cluster_span(spec: &ClusterSpec) -> Span {
    tracing::info_span!(
        "cluster",
        name = %spec.name,
        cloud = %spec.cloud,
        region = %spec.region
    )
}

/// Opens the store under `storage_root()` for the calling user
pub async fn open_store(span: Span) -> anyhow::Result<LocalStore> {
    let root = kubeforge_config::storage_root()?;
    let mut store = LocalStore::new(&root, span);
    store.connect().await?;
    Ok(store)
}

/// Opens the store and binds it to the cluster in `spec`
pub async fn open_cluster_store(spec: &ClusterSpec, span: Span) -> anyhow::Result<LocalStore> {
    let mut store = open_store(span).await?;
    store.setup(spec.cloud, &spec.region, &spec.name, spec.cluster_type)?;
    Ok(store)
}

pub fn meta_for(spec: &ClusterSpec) -> ClusterMeta {
    ClusterMeta::new(&spec.name, &spec.region, spec.cluster_type)
        .with_distro(spec.distro())
        .with_version(spec.version.clone().unwrap_or_default())
        .with_apps(spec.apps.clone(), spec.cni.clone())
}

fn node_plan(pool: &Option<NodePool>) -> NodePlan {
    pool.as_ref()
        .map(|p| NodePlan::new(p.count, &p.size))
        .unwrap_or_else(|| NodePlan::new(0, ""))
}

/// `spec` has been validated by `ClusterSpec::load`
pub fn plan_for(spec: &ClusterSpec) -> ClusterPlan {
    match spec.cluster_type {
        ClusterType::Ha => ClusterPlan::Ha(HaPlan {
            cluster_name: spec.name.clone(),
            control_planes: node_plan(&spec.nodes.controlplane),
            worker_planes: node_plan(&spec.nodes.workerplane),
            data_stores: node_plan(&spec.nodes.datastore),
            load_balancer_size: node_plan(&spec.nodes.loadbalancer).size,
        }),
        ClusterType::Managed => ClusterPlan::Managed(ManagedPlan {
            cluster_name: spec.name.clone(),
            node_count: spec.managed.as_ref().map(|m| m.count).unwrap_or_default(),
            node_size: spec.managed.as_ref().and_then(|m| m.size.clone()),
        }),
    }
}

/// Token cancelled on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{}", "Interrupted, stopping after the current step...".yellow());
            token.cancel();
        }
    });
    cancel
}

pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub fn print_summary(summary: &ClusterSummary) {
    let status = if summary.completed {
        "ready".green()
    } else {
        "incomplete".yellow()
    };
    println!("  {:<12} {}", "name:".bold(), summary.name.cyan());
    println!("  {:<12} {} / {}", "cloud:".bold(), summary.cloud, summary.region);
    println!("  {:<12} {}", "type:".bold(), summary.cluster_type);
    if let Some(distro) = summary.distro {
        println!("  {:<12} {}", "distro:".bold(), distro);
    }
    if !summary.kubernetes_version.is_empty() {
        println!("  {:<12} {}", "version:".bold(), summary.kubernetes_version);
    }
    println!("  {:<12} {}", "nodes:".bold(), node_counts(summary));
    println!("  {:<12} {}", "status:".bold(), status);
}

pub fn node_counts(summary: &ClusterSummary) -> String {
    let n = &summary.nodes;
    match summary.cluster_type {
        ClusterType::Ha => format!(
            "cp={} wp={} ds={} lb={}",
            n.control_planes,
            n.worker_planes,
            n.data_stores,
            u8::from(n.load_balancer)
        ),
        ClusterType::Managed => format!("nodes={}", n.managed_nodes),
    }
}
