mod commands;
mod provider;
mod utils;

use clap::{Parser, Subcommand};
use kubeforge_core::{Cloud, ClusterType};
use kubeforge_storage::ExportFilter;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kubeforge")]
#[command(about = "Resumable Kubernetes cluster infrastructure on Civo, AWS, Azure and kind", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cluster file (default: KUBEFORGE_CLUSTER_FILE, ./cluster.local.yaml, ./cluster.yaml)
    #[arg(short = 'f', long = "file", global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cluster, or finish one a previous run left incomplete
    Create,
    /// Delete the cluster and every resource it owns
    Delete {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show a stored cluster
    Get {
        /// Print only the kubeconfig
        #[arg(long, conflicts_with = "state")]
        kubeconfig: bool,
        /// Print node addresses and SSH identity as JSON (ha clusters)
        #[arg(long)]
        state: bool,
    },
    /// List stored clusters
    List {
        /// Only clusters on this cloud (aws, azure, civo, local)
        #[arg(short, long)]
        cloud: Option<Cloud>,
        /// Only clusters of this type (ha, managed)
        #[arg(short = 't', long = "type")]
        cluster_type: Option<ClusterType>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move the worker pool of an ha cluster to the given size
    Scale {
        /// Desired number of workers
        workers: usize,
        /// VM size for new workers (default: the cluster file's workerplane size)
        #[arg(short, long)]
        size: Option<String>,
    },
    /// Store credentials for a cloud
    Credentials {
        /// Cloud the credentials belong to (aws, azure, civo)
        cloud: Cloud,
        /// Civo API token
        #[arg(long, env = "CIVO_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// AWS access key id
        #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
        access_key_id: Option<String>,
        /// AWS secret access key
        #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
        secret_access_key: Option<String>,
        /// Azure subscription id
        #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
        subscription_id: Option<String>,
        /// Azure tenant id of the service principal
        #[arg(long, env = "AZURE_TENANT_ID")]
        tenant_id: Option<String>,
        /// Azure service principal (application) id
        #[arg(long, env = "AZURE_CLIENT_ID")]
        client_id: Option<String>,
        /// Azure service principal secret
        #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
    },
    /// Export stored clusters and credentials as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        cloud: Option<Cloud>,
        #[arg(short = 't', long = "type")]
        cluster_type: Option<ClusterType>,
        /// Only this cluster (needs --region)
        #[arg(long, requires = "region")]
        name: Option<String>,
        #[arg(long, requires = "name")]
        region: Option<String>,
    },
    /// Import clusters and credentials from an export
    Import {
        /// File written by `kubeforge export`
        input: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output such as exports
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let file = cli.file.as_deref();

    match cli.command {
        Commands::Create => commands::create::handle(file).await?,
        Commands::Delete { yes } => commands::delete::handle(file, yes).await?,
        Commands::Get { kubeconfig, state } => {
            commands::get::handle(file, kubeconfig, state).await?
        }
        Commands::List {
            cloud,
            cluster_type,
            json,
        } => commands::list::handle(cloud, cluster_type, json).await?,
        Commands::Scale { workers, size } => {
            commands::scale::handle(file, workers, size).await?
        }
        Commands::Credentials {
            cloud,
            token,
            access_key_id,
            secret_access_key,
            subscription_id,
            tenant_id,
            client_id,
            client_secret,
        } => {
            let secrets = commands::credentials::Secrets {
                token,
                access_key_id,
                secret_access_key,
                subscription_id,
                tenant_id,
                client_id,
                client_secret,
            };
            commands::credentials::handle(cloud, secrets).await?
        }
        Commands::Export {
            output,
            cloud,
            cluster_type,
            name,
            region,
        } => {
            let filter = ExportFilter {
                cloud,
                cluster_type,
                cluster_name: name,
                region,
            };
            commands::transfer::export(&filter, output.as_deref()).await?
        }
        Commands::Import { input } => commands::transfer::import(&input).await?,
        Commands::Version => {
            println!("kubeforge {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
