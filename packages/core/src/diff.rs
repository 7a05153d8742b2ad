//! Compare the secrets of a source vault against one or more targets.
//!
//! Read-only. The result is wide: one row per source secret, one status per
//! target in the order the targets were given.

use crate::cloud::{SecretStore, VaultUri};
use crate::error::Result;
use crate::fanout::{FanOut, Outcome};
use crate::report::Report;
use crate::source::SourceSnapshot;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffStatus {
    Match,
    Differ,
    NotFoundInTarget,
    Error(String),
}

impl DiffStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, DiffStatus::Error(_))
    }
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffStatus::Match => write!(f, "MATCH"),
            DiffStatus::Differ => write!(f, "DIFFER"),
            DiffStatus::NotFoundInTarget => write!(f, "NOT FOUND"),
            DiffStatus::Error(reason) => write!(f, "ERROR: {}", reason),
        }
    }
}

/// One source secret and its status in each target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRow {
    pub secret: String,
    pub statuses: Vec<DiffStatus>,
}

/// Diff every secret of `source` against every vault in `targets`.
///
/// Fails only if the source secrets cannot be listed. Rows are sorted by
/// secret name; `statuses[i]` belongs to `targets[i]`.
pub async fn diff_secrets(
    source: Arc<dyn SecretStore>,
    targets: Vec<Arc<dyn SecretStore>>,
    engine: &FanOut,
) -> Result<Vec<DiffRow>> {
    let snapshot = SourceSnapshot::load(source, &engine.reporting(None)).await?;
    Ok(diff_snapshot(&snapshot, targets, engine).await)
}

/// Diff an already-loaded source snapshot against `targets`.
pub async fn diff_snapshot(
    snapshot: &SourceSnapshot,
    targets: Vec<Arc<dyn SecretStore>>,
    engine: &FanOut,
) -> Vec<DiffRow> {
    let target_count = targets.len();
    let targets = Arc::new(targets);
    let values = Arc::new(snapshot.values_by_name());

    let pairs: Vec<(String, usize)> = values
        .keys()
        .flat_map(|name| (0..target_count).map(move |index| (name.clone(), index)))
        .collect();

    info!(
        secrets = snapshot.len(),
        targets = target_count,
        pairs = pairs.len(),
        "comparing secrets"
    );

    let completed = {
        let targets = Arc::clone(&targets);
        let values = Arc::clone(&values);
        engine
            .run(pairs, move |(name, index): (String, usize)| {
                let target = Arc::clone(&targets[index]);
                let expected = values.get(&name).cloned();
                async move {
                    let Some(expected) = expected else {
                        return Ok(DiffStatus::Error("source value unavailable".to_string()));
                    };
                    classify(target.as_ref(), &name, &expected).await
                }
            })
            .await
    };

    // Re-key by secret name; completion order says nothing about columns.
    let mut grid: BTreeMap<String, Vec<Option<DiffStatus>>> = snapshot
        .names()
        .map(|name| (name.to_string(), vec![None; target_count]))
        .collect();

    for done in completed {
        let (name, index) = done.item;
        let status = match done.outcome {
            Outcome::Success(status) => status,
            Outcome::Failure(err) => DiffStatus::Error(err.to_string()),
        };
        if let Some(slot) = grid.get_mut(&name).and_then(|row| row.get_mut(index)) {
            *slot = Some(status);
        }
    }

    for (name, reason) in snapshot.unreadable() {
        if let Some(row) = grid.get_mut(name) {
            row.iter_mut()
                .for_each(|slot| *slot = Some(DiffStatus::Error(reason.to_string())));
        }
    }

    grid.into_iter()
        .map(|(secret, statuses)| DiffRow {
            secret,
            statuses: statuses
                .into_iter()
                .map(|s| s.unwrap_or_else(|| DiffStatus::Error("no result".to_string())))
                .collect(),
        })
        .collect()
}

async fn classify(target: &dyn SecretStore, name: &str, expected: &str) -> Result<DiffStatus> {
    match target.get_secret(name).await {
        Ok(actual) if actual == expected => Ok(DiffStatus::Match),
        Ok(_) => Ok(DiffStatus::Differ),
        Err(err) if err.is_not_found() => Ok(DiffStatus::NotFoundInTarget),
        Err(err) => Err(err),
    }
}

/// Column headers for the targets: the vault's short name, or the full URI
/// when two targets share a short name.
pub fn target_headers(targets: &[Arc<dyn SecretStore>]) -> Vec<String> {
    let uris: Vec<VaultUri> = targets
        .iter()
        .map(|target| VaultUri::from_resource_uri(target.uri()))
        .collect();

    let mut seen = HashSet::new();
    let duplicated: HashSet<&str> = uris
        .iter()
        .map(VaultUri::short_name)
        .filter(|short| !seen.insert(*short))
        .collect();

    uris.iter()
        .map(|uri| {
            if duplicated.contains(uri.short_name()) {
                uri.to_string()
            } else {
                uri.short_name().to_string()
            }
        })
        .collect()
}

/// Build the `show-diffs` report.
pub fn diff_report(rows: &[DiffRow], headers: &[String]) -> Report {
    let mut columns = vec!["Secret Name (source)".to_string()];
    columns.extend(headers.iter().cloned());

    let mut report = Report::new("Secret differences (source vs targets)", columns);
    for row in rows {
        let mut cells = vec![row.secret.clone()];
        cells.extend(row.statuses.iter().map(DiffStatus::to_string));
        report.push_row(cells);
    }
    report
}
