//! Bearer token acquisition for Azure.
//!
//! # Sources, in order
//!
//! 1. Service principal from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
//!    `AZURE_CLIENT_SECRET` (OAuth2 client credentials flow)
//! 2. Azure CLI login (`az account get-access-token`)
//!
//! Tokens are never logged.

use super::CredentialProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use tokio::process::Command;
use tracing::debug;

/// A bearer token for one resource scope.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Service principal credentials read from the environment.
#[derive(Clone)]
pub struct ClientSecretCredential {
    http: reqwest::Client,
    login_endpoint: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    /// Build from `AZURE_TENANT_ID`/`AZURE_CLIENT_ID`/`AZURE_CLIENT_SECRET`.
    /// Returns `None` unless all three are set and non-empty.
    pub fn from_env(http: reqwest::Client, login_endpoint: &str) -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Some(Self {
            http,
            login_endpoint: login_endpoint.trim_end_matches('/').to_string(),
            tenant_id: var("AZURE_TENANT_ID")?,
            client_id: var("AZURE_CLIENT_ID")?,
            client_secret: var("AZURE_CLIENT_SECRET")?,
        })
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.login_endpoint, self.tenant_id)
    }
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

#[async_trait]
impl CredentialProvider for ClientSecretCredential {
    async fn acquire(&self, scope: &str) -> Result<AccessToken> {
        debug!(client_id = %self.client_id, scope, "requesting service principal token");

        let scope = default_scope(scope);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self.http.post(self.token_url()).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Auth(format!(
                "token request for tenant {} failed (HTTP {}): {}",
                self.tenant_id,
                status.as_u16(),
                body.trim()
            )));
        }

        let token: OAuthTokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("token response: {}", e)))?;

        Ok(AccessToken::new(token.access_token))
    }
}

/// Token from an existing `az login` session.
#[derive(Debug, Clone, Default)]
pub struct AzureCliCredential;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
}

impl AzureCliCredential {
    /// Returns true if the `az` binary is on `PATH`.
    pub fn is_available() -> bool {
        which::which("az").is_ok()
    }
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
    async fn acquire(&self, scope: &str) -> Result<AccessToken> {
        let az = which::which("az")
            .map_err(|e| Error::Auth(format!("Azure CLI is not installed or not in PATH: {}", e)))?;

        debug!(scope, "requesting token from Azure CLI");

        let output = Command::new(az)
            .args(["account", "get-access-token", "--output", "json", "--resource"])
            .arg(resource_from_scope(scope))
            .output()
            .await
            .map_err(|e| Error::Auth(format!("failed to execute 'az account get-access-token': {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Auth(format!(
                "Azure CLI could not provide a token: {}. Run 'az login' first.",
                if stderr.trim().is_empty() {
                    "unknown error"
                } else {
                    stderr.trim()
                }
            )));
        }

        parse_cli_token(&output.stdout)
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken> {
    let parsed: CliTokenResponse = serde_json::from_slice(stdout)
        .map_err(|e| Error::InvalidResponse(format!("Azure CLI token output: {}", e)))?;

    if parsed.access_token.is_empty() {
        return Err(Error::Auth("Azure CLI returned an empty token".to_string()));
    }

    Ok(AccessToken::new(parsed.access_token))
}

/// `https://vault.azure.net` -> `https://vault.azure.net/.default`
fn default_scope(scope: &str) -> String {
    if scope.ends_with("/.default") {
        scope.to_string()
    } else {
        format!("{}/.default", scope.trim_end_matches('/'))
    }
}

/// `https://vault.azure.net/.default` -> `https://vault.azure.net`
fn resource_from_scope(scope: &str) -> &str {
    scope.trim_end_matches("/.default").trim_end_matches('/')
}

/// The credential chain used by the CLI.
pub enum DefaultCredential {
    ClientSecret(ClientSecretCredential),
    AzureCli(AzureCliCredential),
}

impl DefaultCredential {
    /// Pick the first available source.
    pub fn detect(http: reqwest::Client, login_endpoint: &str) -> Result<Self> {
        if let Some(credential) = ClientSecretCredential::from_env(http, login_endpoint) {
            debug!("using service principal credentials from environment");
            return Ok(DefaultCredential::ClientSecret(credential));
        }

        if AzureCliCredential::is_available() {
            debug!("using Azure CLI credentials");
            return Ok(DefaultCredential::AzureCli(AzureCliCredential));
        }

        Err(Error::Auth(
            "no Azure credentials found: set AZURE_TENANT_ID, AZURE_CLIENT_ID and \
             AZURE_CLIENT_SECRET, or install the Azure CLI and run 'az login'"
                .to_string(),
        ))
    }
}

#[async_trait]
impl CredentialProvider for DefaultCredential {
    async fn acquire(&self, scope: &str) -> Result<AccessToken> {
        match self {
            DefaultCredential::ClientSecret(credential) => credential.acquire(scope).await,
            DefaultCredential::AzureCli(credential) => credential.acquire(scope).await,
        }
    }
}
