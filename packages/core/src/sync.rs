//! Copy secrets from a source vault into one or more target vaults.
//!
//! Each (secret, target) pair is an independent unit that ends in one of
//! four terminal states:
//!
//! ```text
//! Start -> target has secret?  -> replace? -> Replaced
//!                                          -> AlreadyExists
//!       -> target missing      -> Synced
//!       -> any remote error    -> Error
//! ```

use crate::cloud::SecretStore;
use crate::error::Result;
use crate::fanout::{FanOut, Outcome};
use crate::report::Report;
use crate::source::SourceSnapshot;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Terminal state of one (secret, target) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    Replaced,
    AlreadyExists,
    Error(String),
}

impl SyncStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, SyncStatus::Error(_))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "SYNCED"),
            SyncStatus::Replaced => write!(f, "REPLACED"),
            SyncStatus::AlreadyExists => write!(f, "ALREADY EXISTS"),
            SyncStatus::Error(reason) => write!(f, "ERROR: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Overwrite secrets that already exist in a target.
    pub replace_if_exist: bool,
    /// Read targets and report what would happen, without writing.
    pub dry_run: bool,
}

/// Result for one (secret, target) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRow {
    pub secret: String,
    pub target: String,
    pub status: SyncStatus,
}

/// Sync every secret of `source` into every vault in `targets`.
///
/// Fails only if the source secrets cannot be listed. Every other failure is
/// reported in the returned rows, ordered by target (input order) and then
/// secret name.
pub async fn sync_secrets(
    source: Arc<dyn SecretStore>,
    targets: Vec<Arc<dyn SecretStore>>,
    engine: &FanOut,
    options: SyncOptions,
) -> Result<Vec<SyncRow>> {
    let snapshot = SourceSnapshot::load(source, &engine.reporting(None)).await?;
    Ok(sync_snapshot(&snapshot, targets, engine, options).await)
}

/// Sync an already-loaded source snapshot into `targets`.
pub async fn sync_snapshot(
    snapshot: &SourceSnapshot,
    targets: Vec<Arc<dyn SecretStore>>,
    engine: &FanOut,
    options: SyncOptions,
) -> Vec<SyncRow> {
    let targets = Arc::new(targets);
    let values = Arc::new(snapshot.values_by_name());

    let pairs: Vec<(String, usize)> = (0..targets.len())
        .flat_map(|target| values.keys().map(move |name| (name.clone(), target)))
        .collect();

    info!(
        secrets = snapshot.len(),
        targets = targets.len(),
        pairs = pairs.len(),
        replace_if_exist = options.replace_if_exist,
        dry_run = options.dry_run,
        "syncing secrets"
    );

    let completed = {
        let targets = Arc::clone(&targets);
        let values = Arc::clone(&values);
        engine
            .run(pairs, move |(name, index): (String, usize)| {
                let target = Arc::clone(&targets[index]);
                let value = values.get(&name).cloned();
                async move {
                    match value {
                        Some(value) => sync_one(target.as_ref(), &name, &value, options).await,
                        None => Ok(SyncStatus::Error("source value unavailable".to_string())),
                    }
                }
            })
            .await
    };

    let mut rows: BTreeMap<(usize, String), SyncStatus> = BTreeMap::new();

    for done in completed {
        let (name, index) = done.item;
        let status = match done.outcome {
            Outcome::Success(status) => status,
            Outcome::Failure(err) => SyncStatus::Error(err.to_string()),
        };
        rows.insert((index, name), status);
    }

    // Secrets whose source read failed never reach the targets.
    for (name, reason) in snapshot.unreadable() {
        for index in 0..targets.len() {
            rows.insert((index, name.to_string()), SyncStatus::Error(reason.to_string()));
        }
    }

    rows.into_iter()
        .map(|((index, secret), status)| SyncRow {
            secret,
            target: targets[index].uri().to_string(),
            status,
        })
        .collect()
}

async fn sync_one(
    target: &dyn SecretStore,
    name: &str,
    value: &str,
    options: SyncOptions,
) -> Result<SyncStatus> {
    match target.get_secret(name).await {
        Ok(_) if !options.replace_if_exist => Ok(SyncStatus::AlreadyExists),
        Ok(_) => {
            if !options.dry_run {
                target.set_secret(name, value).await?;
            }
            debug!(vault = target.uri(), secret = name, "replaced");
            Ok(SyncStatus::Replaced)
        }
        Err(err) if err.is_not_found() => {
            if !options.dry_run {
                target.set_secret(name, value).await?;
            }
            debug!(vault = target.uri(), secret = name, "synced");
            Ok(SyncStatus::Synced)
        }
        Err(err) => Err(err),
    }
}

/// Build the `sync` report.
pub fn sync_report(rows: &[SyncRow], options: SyncOptions) -> Report {
    let title = if options.dry_run {
        "Secret sync plan (dry run, nothing written)"
    } else {
        "Secret sync results"
    };

    let mut report = Report::new(
        title,
        vec![
            "Secret Name".to_string(),
            "Target Keyvault".to_string(),
            "Status".to_string(),
        ],
    );

    for row in rows {
        report.push_row(vec![
            row.secret.clone(),
            row.target.clone(),
            row.status.to_string(),
        ]);
    }

    report
}

/// Count of rows per terminal state, for the closing summary line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub replaced: usize,
    pub already_exists: usize,
    pub errors: usize,
}

impl SyncSummary {
    pub fn from_rows(rows: &[SyncRow]) -> Self {
        rows.iter().fold(Self::default(), |mut summary, row| {
            match row.status {
                SyncStatus::Synced => summary.synced += 1,
                SyncStatus::Replaced => summary.replaced += 1,
                SyncStatus::AlreadyExists => summary.already_exists += 1,
                SyncStatus::Error(_) => summary.errors += 1,
            }
            summary
        })
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} synced, {} replaced, {} already existed, {} failed",
            self.synced, self.replaced, self.already_exists, self.errors
        )
    }
}
