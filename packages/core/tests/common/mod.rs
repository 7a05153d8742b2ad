//! Common testing utilities for keyvault-sync integration tests.
//!
//! In-memory stand-ins for the cloud collaborators, with failure injection.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use keyvault_sync::cloud::{ResourceEnumerator, SecretStore, Subscription, VaultResource};
use keyvault_sync::error::{Error, Result};
use keyvault_sync::fanout::{FanOut, WorkerPool};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Engine used by the integration tests.
pub fn engine(size: usize) -> FanOut {
    FanOut::new(WorkerPool::new(size))
}

/// Share an inspectable vault as a trait object.
pub fn store(vault: &Arc<InMemoryVault>) -> Arc<dyn SecretStore> {
    Arc::clone(vault) as Arc<dyn SecretStore>
}

/// A vault held in memory.
pub struct InMemoryVault {
    uri: String,
    secrets: Mutex<BTreeMap<String, String>>,
    failing_gets: HashSet<String>,
    failing_sets: HashSet<String>,
    fail_listing: bool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryVault {
    pub fn new(name: &str) -> Self {
        Self::at(&format!("https://{}.vault.azure.net/", name))
    }

    /// A vault at an explicit URI (e.g. a sovereign cloud).
    pub fn at(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            secrets: Mutex::new(BTreeMap::new()),
            failing_gets: HashSet::new(),
            failing_sets: HashSet::new(),
            fail_listing: false,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_secret(self, name: &str, value: &str) -> Self {
        self.secrets
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Reading `name` fails with a 500.
    pub fn failing_get(mut self, name: &str) -> Self {
        self.failing_gets.insert(name.to_string());
        self
    }

    /// Writing `name` is denied with a 403.
    pub fn failing_set(mut self, name: &str) -> Self {
        self.failing_sets.insert(name.to_string());
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.secrets.lock().unwrap().clone()
    }

    /// Number of `get_secret` calls, failed ones included.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful `set_secret` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for InMemoryVault {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn list_secret_names(&self) -> BoxStream<'_, Result<String>> {
        if self.fail_listing {
            return stream::iter(vec![Err(Error::Api {
                status: 503,
                code: Some("ServiceUnavailable".to_string()),
                message: "listing unavailable".to_string(),
            })])
            .boxed();
        }

        let names: Vec<Result<String>> = self
            .secrets
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(names).boxed()
    }

    async fn get_secret(&self, name: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if self.failing_gets.contains(name) {
            return Err(Error::Api {
                status: 500,
                code: Some("InternalError".to_string()),
                message: format!("cannot read {}", name),
            });
        }

        self.secrets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("secret {}", name)))
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<()> {
        if self.failing_sets.contains(name) {
            return Err(Error::Auth(format!("write denied for {}", name)));
        }

        self.secrets
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Subscriptions and vaults held in memory.
#[derive(Default)]
pub struct FakeEnumerator {
    subscriptions: Vec<Subscription>,
    vaults: HashMap<String, Vec<VaultResource>>,
    failing: HashSet<String>,
}

impl FakeEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription(mut self, id: &str) -> Self {
        self.subscriptions.push(Subscription {
            id: id.to_string(),
            display_name: Some(format!("Subscription {}", id)),
        });
        self.vaults.entry(id.to_string()).or_default();
        self
    }

    pub fn vault(mut self, subscription_id: &str, resource_group: &str, name: &str) -> Self {
        self.vaults
            .entry(subscription_id.to_string())
            .or_default()
            .push(VaultResource {
                id: format!(
                    "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.KeyVault/vaults/{}",
                    subscription_id, resource_group, name
                ),
                name: name.to_string(),
                uri: format!("https://{}.vault.azure.net/", name),
            });
        self
    }

    /// Listing the vaults of `subscription_id` fails with a 403.
    pub fn failing(mut self, subscription_id: &str) -> Self {
        self.failing.insert(subscription_id.to_string());
        self
    }

    pub fn into_enumerator(self) -> Arc<dyn ResourceEnumerator> {
        Arc::new(self)
    }
}

#[async_trait]
impl ResourceEnumerator for FakeEnumerator {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.clone())
    }

    async fn list_vaults(&self, subscription_id: &str) -> Result<Vec<VaultResource>> {
        if self.failing.contains(subscription_id) {
            return Err(Error::Auth(format!(
                "no access to subscription {}",
                subscription_id
            )));
        }
        Ok(self.vaults.get(subscription_id).cloned().unwrap_or_default())
    }
}

/// Test context that manages temporary files and directories.
pub struct TestContext {
    /// Path to temporary directory
    pub temp_path: PathBuf,
    /// The temporary directory (kept to prevent early deletion)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a test file with content.
    pub fn create_file(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let file_path = self.temp_path.join(name);
        let mut file = fs::File::create(&file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(file_path)
    }
}
