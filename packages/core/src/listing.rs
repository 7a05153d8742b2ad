//! Discover Key Vaults across subscriptions.

use crate::cloud::{ResourceEnumerator, Subscription, VaultResource};
use crate::error::Result;
use crate::fanout::{FanOut, Outcome};
use crate::report::Report;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// One discovered vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRecord {
    pub uri: String,
    pub resource_group: String,
    pub subscription_id: String,
}

/// Optional allow-set of names, compared case-insensitively.
///
/// `None` allows everything.
#[derive(Debug, Clone, Default)]
pub struct AllowSet(Option<HashSet<String>>);

impl AllowSet {
    pub fn any() -> Self {
        Self(None)
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(Some(
            names
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .collect(),
        ))
    }

    /// `Some(list)` restricts to `list`, `None` allows everything.
    pub fn from_option(names: Option<Vec<String>>) -> Self {
        names.map(Self::only).unwrap_or_default()
    }

    pub fn allows(&self, name: &str) -> bool {
        match &self.0 {
            Some(names) => names.contains(&name.to_lowercase()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VaultFilter {
    pub subscriptions: AllowSet,
    pub resource_groups: AllowSet,
}

/// List every vault visible through `enumerator`.
///
/// Fails only if the subscriptions themselves cannot be listed. A
/// subscription whose vaults cannot be listed is logged and contributes no
/// rows. Records are ordered by subscription (enumeration order), then URI.
pub async fn list_vaults(
    enumerator: Arc<dyn ResourceEnumerator>,
    engine: &FanOut,
    filter: &VaultFilter,
) -> Result<Vec<VaultRecord>> {
    let subscriptions = enumerator.list_subscriptions().await?;
    let total = subscriptions.len();

    let selected: Vec<(usize, Subscription)> = subscriptions
        .into_iter()
        .filter(|sub| filter.subscriptions.allows(&sub.id))
        .enumerate()
        .collect();

    info!(total, selected = selected.len(), "scanning subscriptions");

    let resource_groups = filter.resource_groups.clone();
    let completed = engine
        .run(selected, move |(_, subscription): (usize, Subscription)| {
            let enumerator = Arc::clone(&enumerator);
            let resource_groups = resource_groups.clone();
            async move {
                let vaults = enumerator.list_vaults(&subscription.id).await?;
                Ok(records_for(&subscription.id, vaults, &resource_groups))
            }
        })
        .await;

    let mut ordered: Vec<(usize, Vec<VaultRecord>)> = Vec::with_capacity(completed.len());
    for done in completed {
        let (position, subscription) = done.item;
        match done.outcome {
            Outcome::Success(records) => ordered.push((position, records)),
            Outcome::Failure(err) => {
                warn!(
                    subscription_id = %subscription.id,
                    error = %err,
                    "skipping subscription"
                );
            }
        }
    }

    ordered.sort_by_key(|(position, _)| *position);

    Ok(ordered
        .into_iter()
        .flat_map(|(_, mut records)| {
            records.sort_by(|a, b| a.uri.cmp(&b.uri));
            records
        })
        .collect())
}

fn records_for(
    subscription_id: &str,
    vaults: Vec<VaultResource>,
    resource_groups: &AllowSet,
) -> Vec<VaultRecord> {
    vaults
        .into_iter()
        .filter_map(|vault| {
            let resource_group = vault.resource_group().unwrap_or_default().to_string();
            if !resource_groups.allows(&resource_group) {
                return None;
            }
            Some(VaultRecord {
                uri: vault.uri,
                resource_group,
                subscription_id: subscription_id.to_string(),
            })
        })
        .collect()
}

/// Build the `list-keyvaults` report.
pub fn listing_report(records: &[VaultRecord]) -> Report {
    let mut report = Report::new(
        "Key Vaults accessible to you",
        vec![
            "Keyvault URI".to_string(),
            "Resource Group".to_string(),
            "Subscription ID".to_string(),
        ],
    );

    for record in records {
        report.push_row(vec![
            record.uri.clone(),
            record.resource_group.clone(),
            record.subscription_id.clone(),
        ]);
    }

    report
}
