//! Azure Resource Manager client: subscriptions and Key Vault resources.

use super::{AccessToken, ResourceEnumerator, Subscription, VaultResource, VaultUri};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";
const KEYVAULT_API_VERSION: &str = "2023-07-01";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionEntry {
    subscription_id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VaultEntry {
    id: String,
    name: String,
    #[serde(default)]
    properties: VaultProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultProperties {
    vault_uri: Option<String>,
}

impl From<SubscriptionEntry> for Subscription {
    fn from(entry: SubscriptionEntry) -> Self {
        Subscription {
            id: entry.subscription_id,
            display_name: entry.display_name,
        }
    }
}

impl VaultEntry {
    fn into_resource(self, dns_suffix: &str) -> VaultResource {
        // vaultUri is absent while a vault is still provisioning
        let uri = match self.properties.vault_uri {
            Some(uri) => VaultUri::from_resource_uri(&uri),
            None => VaultUri::from_resource_uri(&format!("https://{}.{}", self.name, dns_suffix)),
        };

        VaultResource {
            id: self.id,
            name: self.name,
            uri: uri.to_string(),
        }
    }
}

/// Management-plane client.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    vault_dns_suffix: String,
    token: AccessToken,
}

impl ArmClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        vault_dns_suffix: &str,
        token: AccessToken,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            vault_dns_suffix: vault_dns_suffix.to_string(),
            token,
        }
    }

    fn subscriptions_url(&self) -> String {
        format!(
            "{}/subscriptions?api-version={}",
            self.endpoint, SUBSCRIPTIONS_API_VERSION
        )
    }

    fn vaults_url(&self, subscription_id: &str) -> String {
        format!(
            "{}/subscriptions/{}/providers/Microsoft.KeyVault/vaults?api-version={}",
            self.endpoint,
            urlencoding::encode(subscription_id),
            KEYVAULT_API_VERSION
        )
    }

    /// Follow `nextLink` until the collection is exhausted.
    async fn get_all<T: DeserializeOwned>(&self, first: String, resource: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next {
            let response = self
                .http
                .get(&url)
                .bearer_auth(self.token.secret())
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                return Err(Error::from_response(status.as_u16(), &body, resource));
            }

            let page: Page<T> = serde_json::from_str(&body)
                .map_err(|e| Error::InvalidResponse(format!("{}: {}", resource, e)))?;

            items.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }

        Ok(items)
    }
}

#[async_trait]
impl ResourceEnumerator for ArmClient {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let entries: Vec<SubscriptionEntry> = self
            .get_all(self.subscriptions_url(), "subscriptions")
            .await?;

        debug!(count = entries.len(), "listed subscriptions");
        Ok(entries.into_iter().map(Subscription::from).collect())
    }

    async fn list_vaults(&self, subscription_id: &str) -> Result<Vec<VaultResource>> {
        let entries: Vec<VaultEntry> = self
            .get_all(
                self.vaults_url(subscription_id),
                &format!("vaults in subscription {}", subscription_id),
            )
            .await?;

        debug!(subscription_id, count = entries.len(), "listed vaults");
        Ok(entries
            .into_iter()
            .map(|entry| entry.into_resource(&self.vault_dns_suffix))
            .collect())
    }
}
