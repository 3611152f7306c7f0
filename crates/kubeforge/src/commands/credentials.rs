use crate::utils;
use colored::Colorize;
use kubeforge_core::{AzureCredentials, Cloud, CredentialsDocument};
use kubeforge_storage::StorageDriver;
use tracing::Span;

/// Secrets accepted by `kubeforge credentials`
#[derive(Debug, Default)]
pub struct Secrets {
    pub token: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

pub async fn handle(cloud: Cloud, secrets: Secrets) -> anyhow::Result<()> {
    let Secrets {
        token,
        access_key_id,
        secret_access_key,
        subscription_id,
        tenant_id,
        client_id,
        client_secret,
    } = secrets;
    let doc = match cloud {
        Cloud::Civo => {
            let token = token.ok_or_else(|| anyhow::anyhow!("--token is required for civo"))?;
            CredentialsDocument::civo(token)
        }
        Cloud::Aws => match (access_key_id, secret_access_key) {
            (Some(access), Some(secret)) => CredentialsDocument::aws(access, secret),
            _ => anyhow::bail!("--access-key-id and --secret-access-key are required for aws"),
        },
        Cloud::Azure => match (subscription_id, tenant_id, client_id, client_secret) {
            (Some(subscription_id), Some(tenant_id), Some(client_id), Some(client_secret)) => {
                CredentialsDocument::azure(AzureCredentials {
                    subscription_id,
                    tenant_id,
                    client_id,
                    client_secret,
                })
            }
            _ => anyhow::bail!(
                "--subscription-id, --tenant-id, --client-id and --client-secret are required for azure"
            ),
        },
        Cloud::Local => anyhow::bail!("local clusters need no credentials"),
    };

    let store = utils::open_store(Span::none()).await?;
    store.write_credentials(cloud, &doc).await?;

    println!(
        "{}",
        format!("✓ Stored {cloud} credentials").green().bold()
    );
    Ok(())
}
