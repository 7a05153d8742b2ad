//! Snapshot of the source vault shared by sync and diff.
//!
//! Secret names are listed once; each value is then fetched once and reused
//! for every target, so the source sees one read per secret regardless of how
//! many targets there are.

use crate::cloud::SecretStore;
use crate::error::Result;
use crate::fanout::{FanOut, Outcome};
use futures::TryStreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Source secret values keyed by name. A value that could not be read keeps
/// the failure reason instead.
#[derive(Debug, Default)]
pub struct SourceSnapshot {
    values: BTreeMap<String, std::result::Result<Arc<String>, String>>,
}

impl SourceSnapshot {
    /// List and read every secret in `source`.
    ///
    /// Listing failure is returned as an error (nothing can be compared
    /// without the name set); individual read failures are kept per secret.
    pub async fn load(source: Arc<dyn SecretStore>, engine: &FanOut) -> Result<Self> {
        let names: BTreeSet<String> = source.list_secret_names().try_collect().await?;
        info!(vault = source.uri(), count = names.len(), "listed source secrets");

        let reader = Arc::clone(&source);
        let fetched = engine
            .run(names.into_iter().collect(), move |name: String| {
                let reader = Arc::clone(&reader);
                async move { reader.get_secret(&name).await }
            })
            .await;

        let mut values = BTreeMap::new();
        for completed in fetched {
            let value = match completed.outcome {
                Outcome::Success(value) => Ok(Arc::new(value)),
                Outcome::Failure(err) => {
                    warn!(secret = %completed.item, error = %err, "failed to read source secret");
                    Err(format!("source: {}", err))
                }
            };
            values.insert(completed.item, value);
        }

        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Secret names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Secrets whose value was read successfully.
    pub fn readable(&self) -> impl Iterator<Item = (&str, &Arc<String>)> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_ref().ok().map(|v| (name.as_str(), v)))
    }

    /// Secrets whose value could not be read, with the reason.
    pub fn unreadable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_ref().err().map(|e| (name.as_str(), e.as_str())))
    }

    pub(crate) fn values_by_name(&self) -> BTreeMap<String, Arc<String>> {
        self.readable()
            .map(|(name, value)| (name.to_string(), Arc::clone(value)))
            .collect()
    }
}
