//! Key Vault data-plane client (secrets REST API).
//!
//! # Endpoints Used
//!
//! - `GET  {vault}/secrets` - list secret identifiers (paged via `nextLink`)
//! - `GET  {vault}/secrets/{name}` - read the current version of a secret
//! - `PUT  {vault}/secrets/{name}` - write a new version of a secret
//!
//! Secret values are never logged.

use super::{AccessToken, SecretStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

pub const API_VERSION: &str = "7.4";

/// Normalized data-plane URI of a vault, always with a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultUri(String);

impl VaultUri {
    /// Parse a vault argument.
    ///
    /// Accepts a full URI (`https://kv-prod.vault.azure.net`) or a bare
    /// vault name (`kv-prod`), which is expanded with `dns_suffix`.
    pub fn parse(input: &str, dns_suffix: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::Config("vault URI cannot be empty".to_string()));
        }

        if !input.contains("://") {
            if !is_valid_vault_name(input) {
                return Err(Error::Config(format!(
                    "'{}' is neither a vault URI nor a valid vault name \
                     (3-24 characters: letters, digits and hyphens)",
                    input
                )));
            }
            return Ok(Self(format!(
                "https://{}.{}/",
                input.to_ascii_lowercase(),
                dns_suffix.trim_matches('.')
            )));
        }

        let url = Url::parse(input)
            .map_err(|e| Error::Config(format!("invalid vault URI '{}': {}", input, e)))?;

        if url.scheme() != "https" {
            return Err(Error::Config(format!("vault URI must use https: '{}'", input)));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config(format!("vault URI has no host: '{}'", input)))?;

        Ok(Self(format!("https://{}/", host.to_ascii_lowercase())))
    }

    /// Wrap an already-normalized URI, as returned by the management plane.
    pub fn from_resource_uri(uri: &str) -> Self {
        let uri = uri.trim().to_ascii_lowercase();
        if uri.ends_with('/') {
            Self(uri)
        } else {
            Self(format!("{}/", uri))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First label of the host: `https://kv-prod.vault.azure.net/` -> `kv-prod`.
    pub fn short_name(&self) -> &str {
        let host = self.0.split("//").last().unwrap_or(&self.0);
        host.split(['.', '/']).next().unwrap_or(host)
    }
}

impl fmt::Display for VaultUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse the `--source-keyvault`/`--target-keyvaults` pair.
///
/// Rejects a target that is the source itself and collapses duplicate
/// targets, keeping the first occurrence so column order follows the input.
pub fn resolve_vault_args(
    source: &str,
    targets: &[String],
    dns_suffix: &str,
) -> Result<(VaultUri, Vec<VaultUri>)> {
    let source = VaultUri::parse(source, dns_suffix)?;

    let mut resolved: Vec<VaultUri> = Vec::with_capacity(targets.len());
    for target in targets {
        let uri = VaultUri::parse(target, dns_suffix)?;
        if uri == source {
            return Err(Error::Config(format!(
                "target vault {} is the same as the source vault",
                uri
            )));
        }
        if resolved.contains(&uri) {
            warn!(vault = %uri, "ignoring duplicate target vault");
            continue;
        }
        resolved.push(uri);
    }

    if resolved.is_empty() {
        return Err(Error::Config("at least one target vault is required".to_string()));
    }

    Ok((source, resolved))
}

fn is_valid_vault_name(name: &str) -> bool {
    (3..=24).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretListPage {
    #[serde(default)]
    value: Vec<SecretItem>,
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretItem {
    id: String,
    #[serde(default)]
    managed: bool,
}

impl SecretListPage {
    /// Names of the secrets on this page. Certificate-backed secrets are
    /// managed by Key Vault and cannot be written directly, so they are left
    /// out unless `include_managed` is set.
    fn names(&self, include_managed: bool) -> Vec<String> {
        self.value
            .iter()
            .filter(|item| {
                if item.managed && !include_managed {
                    debug!(id = %item.id, "skipping managed secret");
                    return false;
                }
                true
            })
            .filter_map(|item| secret_name_from_id(&item.id))
            .collect()
    }

    fn next(&self) -> Option<String> {
        self.next_link.clone().filter(|link| !link.is_empty())
    }
}

/// `https://kv.vault.azure.net/secrets/db-pass[/version]` -> `db-pass`
fn secret_name_from_id(id: &str) -> Option<String> {
    let mut segments = id.split('/');
    segments.find(|s| *s == "secrets")?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

#[derive(Serialize)]
struct SetSecretRequest<'a> {
    value: &'a str,
}

/// Secrets client for one vault.
#[derive(Clone)]
pub struct KeyVaultClient {
    http: reqwest::Client,
    uri: VaultUri,
    token: AccessToken,
    include_managed: bool,
}

impl KeyVaultClient {
    pub fn new(http: reqwest::Client, uri: VaultUri, token: AccessToken) -> Self {
        Self {
            http,
            uri,
            token,
            include_managed: false,
        }
    }

    /// List certificate-backed secrets too. Only useful for read-only work.
    pub fn with_managed_secrets(mut self, include: bool) -> Self {
        self.include_managed = include;
        self
    }

    fn secret_url(&self, name: &str) -> String {
        format!(
            "{}secrets/{}?api-version={}",
            self.uri,
            urlencoding::encode(name),
            API_VERSION
        )
    }

    fn list_url(&self) -> String {
        format!("{}secrets?api-version={}&maxresults=25", self.uri, API_VERSION)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, resource: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.secret())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::from_response(status.as_u16(), &body, resource));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("{} from {}: {}", resource, self.uri, e)))
    }
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    fn uri(&self) -> &str {
        self.uri.as_str()
    }

    fn list_secret_names(&self) -> BoxStream<'_, Result<String>> {
        stream::try_unfold(Some(self.list_url()), move |next| async move {
            let Some(url) = next else {
                return Ok::<_, Error>(None);
            };

            debug!(vault = %self.uri, "fetching secret list page");
            let page: SecretListPage = self.get_json(&url, "secret list").await?;
            let next = page.next();
            Ok::<_, Error>(Some((page.names(self.include_managed), next)))
        })
        .map_ok(|names| stream::iter(names.into_iter().map(Ok::<String, Error>)))
        .try_flatten()
        .boxed()
    }

    async fn get_secret(&self, name: &str) -> Result<String> {
        let bundle: SecretBundle = self.get_json(&self.secret_url(name), name).await?;
        bundle
            .value
            .ok_or_else(|| Error::InvalidResponse(format!("secret '{}' has no value", name)))
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<()> {
        debug!(vault = %self.uri, secret = name, "writing secret");

        let response = self
            .http
            .put(self.secret_url(name))
            .bearer_auth(self.token.secret())
            .json(&SetSecretRequest { value })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_response(status.as_u16(), &body, name));
        }

        Ok(())
    }
}
