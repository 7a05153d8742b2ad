//! Cloud collaborators: credentials, resource enumeration and secret stores.
//!
//! The aggregators only see the traits in this module. Production code uses
//! the Azure implementations:
//!
//! - [`credential::DefaultCredential`] (service principal, then `az` CLI)
//! - [`arm::ArmClient`] (Azure Resource Manager: subscriptions and vaults)
//! - [`keyvault::KeyVaultClient`] (Key Vault data plane: secrets)

pub mod arm;
pub mod credential;
pub mod keyvault;

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use arm::ArmClient;
pub use credential::{AccessToken, DefaultCredential};
pub use keyvault::{resolve_vault_args, KeyVaultClient, VaultUri};

/// Source of bearer tokens for a given resource scope.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Acquire a token for `scope` (e.g. `https://vault.azure.net`).
    async fn acquire(&self, scope: &str) -> Result<AccessToken>;
}

/// A subscription visible to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub display_name: Option<String>,
}

/// A Key Vault resource as reported by the management plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultResource {
    /// Full ARM resource ID
    /// (`/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.KeyVault/vaults/{name}`).
    pub id: String,
    pub name: String,
    /// Data-plane URI, e.g. `https://name.vault.azure.net/`.
    pub uri: String,
}

impl VaultResource {
    /// Resource group segment of the ARM resource ID.
    pub fn resource_group(&self) -> Option<&str> {
        resource_group_from_id(&self.id)
    }
}

/// Extract the resource group name from an ARM resource ID.
///
/// ARM IDs are case-insensitive, so the `resourceGroups` key is matched
/// without regard to case.
pub fn resource_group_from_id(id: &str) -> Option<&str> {
    let mut segments = id.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourceGroups") {
            return segments.next();
        }
    }
    None
}

/// Lists subscriptions and the vaults inside them.
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;

    async fn list_vaults(&self, subscription_id: &str) -> Result<Vec<VaultResource>>;
}

/// Secret operations against a single vault.
///
/// `get_secret` reports an absent secret as [`crate::error::Error::NotFound`].
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Identifier shown in reports (the vault URI).
    fn uri(&self) -> &str;

    /// Lazily page through the names of all secrets in the vault.
    fn list_secret_names(&self) -> BoxStream<'_, Result<String>>;

    async fn get_secret(&self, name: &str) -> Result<String>;

    async fn set_secret(&self, name: &str, value: &str) -> Result<()>;
}
