// keyvault-sync - Synchronize secrets between Azure Key Vaults
//
// This is the main entry point for the application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyvault_sync::cancel::install_interrupt_handler;
use keyvault_sync::cloud::{
    resolve_vault_args, AccessToken, ArmClient, CredentialProvider, DefaultCredential, KeyVaultClient,
    ResourceEnumerator, SecretStore, VaultUri,
};
use keyvault_sync::config::Config;
use keyvault_sync::diff::{diff_report, diff_snapshot, target_headers};
use keyvault_sync::fanout::{CancelToken, FanOut, ProgressFn, WorkerPool};
use keyvault_sync::listing::{list_vaults, listing_report, AllowSet, VaultFilter};
use keyvault_sync::report::{self, OutputFormat};
use keyvault_sync::source::SourceSnapshot;
use keyvault_sync::sync::{sync_report, sync_snapshot, SyncOptions, SyncSummary};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status when the report contains failed items.
const EXIT_ITEMS_FAILED: i32 = 2;

/// keyvault-sync - Synchronize, list and diff secrets across Azure Key Vaults
#[derive(Parser, Debug)]
#[command(name = "keyvault-sync")]
#[command(version)]
#[command(about = "Synchronize secrets between Azure Key Vaults", long_about = None)]
struct Cli {
    /// Path to a configuration file (default: keyvault-sync.yaml, then ~/.config/keyvault-sync/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum number of concurrent remote requests
    #[arg(short = 'j', long, global = true, env = "KEYVAULT_SYNC_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Print the report as JSON
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    /// Don't show the progress counter
    #[arg(long, global = true, default_value = "false")]
    no_progress: bool,

    /// Verbose logging (overridden by KEYVAULT_SYNC_LOG)
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy every secret of the source vault into the target vaults
    Sync {
        /// URI (or name) of the source Key Vault
        #[arg(long)]
        source_keyvault: String,

        /// URIs (or names) of the target Key Vaults
        #[arg(long, required = true, num_args = 1..)]
        target_keyvaults: Vec<String>,

        /// Replace secrets in target Key Vaults if they already exist
        #[arg(long, default_value = "false")]
        replace_if_exist: bool,

        /// Dry run - show what would be synced without writing anything
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// List the Key Vaults accessible to you
    ListKeyvaults {
        /// IDs of the subscriptions to scan (default: all accessible subscriptions)
        #[arg(long, num_args = 1..)]
        subscriptions: Option<Vec<String>>,

        /// Only show vaults in these resource groups
        #[arg(long, num_args = 1..)]
        resource_groups: Option<Vec<String>>,
    },

    /// Show which source secrets are missing or different in the target vaults
    ShowDiffs {
        /// URI (or name) of the source Key Vault
        #[arg(long)]
        source_keyvault: String,

        /// URIs (or names) of the target Key Vaults
        #[arg(long, required = true, num_args = 1..)]
        target_keyvaults: Vec<String>,
    },
}

/// Everything a command needs, built once per invocation.
struct Session {
    config: Config,
    http: reqwest::Client,
    engine: FanOut,
    format: OutputFormat,
    show_progress: bool,
}

impl Session {
    fn new(cli: &Cli, cancel: CancelToken) -> Result<Self> {
        let mut config = Config::load(cli.config.as_deref())?;
        if let Some(max) = cli.max_concurrency {
            config.max_concurrency = max;
        }
        config.validate().with_context(|| "Configuration validation failed")?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        let engine = FanOut::new(WorkerPool::new(config.max_concurrency)).with_cancel(cancel);
        info!(max_concurrency = engine.pool().size(), "worker pool ready");

        let format = if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        };

        Ok(Self {
            config,
            http,
            engine,
            format,
            show_progress: !cli.no_progress && !cli.json,
        })
    }

    /// Acquire a token for `scope`. Any failure here aborts the command.
    async fn token(&self, scope: &str) -> Result<AccessToken> {
        let credential = DefaultCredential::detect(self.http.clone(), &self.config.cloud.login_endpoint)
            .context("Failed to find Azure credentials")?;

        credential
            .acquire(scope)
            .await
            .with_context(|| format!("Failed to acquire an access token for {}", scope))
    }

    /// The shared engine, reporting progress under `label` if enabled.
    fn engine(&self, label: &str) -> FanOut {
        let progress: Option<ProgressFn> = if self.show_progress {
            report::progress_line(label)
        } else {
            None
        };
        self.engine.reporting(progress)
    }

    /// Clients for the source and target vaults. `include_managed` lists
    /// certificate-backed secrets as well, which only read-only commands want.
    async fn vault_clients(
        &self,
        source: &str,
        targets: &[String],
        include_managed: bool,
    ) -> Result<(Arc<dyn SecretStore>, Vec<Arc<dyn SecretStore>>)> {
        let (source, targets) = resolve_vault_args(source, targets, &self.config.cloud.vault_dns_suffix)?;

        let token = self.token(&self.config.cloud.vault_scope).await?;

        let client = |uri: VaultUri| -> Arc<dyn SecretStore> {
            Arc::new(
                KeyVaultClient::new(self.http.clone(), uri, token.clone())
                    .with_managed_secrets(include_managed),
            )
        };

        Ok((client(source), targets.into_iter().map(client).collect()))
    }

    /// Read every source secret once, with its own progress line.
    async fn load_source(&self, source: Arc<dyn SecretStore>) -> Result<SourceSnapshot> {
        let uri = source.uri().to_string();

        let snapshot = SourceSnapshot::load(source, &self.engine("Reading source"))
            .await
            .with_context(|| format!("Failed to read secrets from source vault: {}", uri))?;

        if snapshot.is_empty() {
            warn!(vault = %uri, "source vault has no secrets");
        }

        Ok(snapshot)
    }
}

/// Outcome of a command that ran to the end.
enum RunStatus {
    Clean,
    ItemsFailed,
}

async fn run_sync(
    session: &Session,
    source: &str,
    targets: &[String],
    options: SyncOptions,
) -> Result<RunStatus> {
    let (source, targets) = session.vault_clients(source, targets, false).await?;
    let snapshot = session.load_source(source).await?;

    let rows = sync_snapshot(&snapshot, targets, &session.engine("Syncing secrets"), options).await;

    report::print(&sync_report(&rows, options), session.format)?;

    let summary = SyncSummary::from_rows(&rows);
    if session.format == OutputFormat::Table {
        eprintln!("\n📊 {}", summary);
    }

    Ok(if summary.errors > 0 {
        RunStatus::ItemsFailed
    } else {
        RunStatus::Clean
    })
}

async fn run_list_keyvaults(
    session: &Session,
    subscriptions: Option<Vec<String>>,
    resource_groups: Option<Vec<String>>,
) -> Result<RunStatus> {
    let token = session.token(&session.config.cloud.management_endpoint).await?;

    let enumerator: Arc<dyn ResourceEnumerator> = Arc::new(ArmClient::new(
        session.http.clone(),
        &session.config.cloud.management_endpoint,
        &session.config.cloud.vault_dns_suffix,
        token,
    ));

    let filter = VaultFilter {
        subscriptions: AllowSet::from_option(subscriptions),
        resource_groups: AllowSet::from_option(resource_groups),
    };

    let records = list_vaults(enumerator, &session.engine("Processing subscriptions"), &filter)
        .await
        .context("Failed to list subscriptions")?;

    report::print(&listing_report(&records), session.format)?;

    Ok(RunStatus::Clean)
}

async fn run_show_diffs(session: &Session, source: &str, targets: &[String]) -> Result<RunStatus> {
    let (source, targets) = session.vault_clients(source, targets, true).await?;
    let headers = target_headers(&targets);
    let snapshot = session.load_source(source).await?;

    let rows = diff_snapshot(&snapshot, targets, &session.engine("Comparing secrets")).await;

    report::print(&diff_report(&rows, &headers), session.format)?;

    let failed = rows
        .iter()
        .any(|row| row.statuses.iter().any(|status| status.is_error()));

    Ok(if failed {
        RunStatus::ItemsFailed
    } else {
        RunStatus::Clean
    })
}

fn run(cli: Cli) -> Result<RunStatus> {
    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(async {
        let session = Session::new(&cli, cancel)?;

        match &cli.command {
            Commands::Sync {
                source_keyvault,
                target_keyvaults,
                replace_if_exist,
                dry_run,
            } => {
                let options = SyncOptions {
                    replace_if_exist: *replace_if_exist,
                    dry_run: *dry_run,
                };
                run_sync(&session, source_keyvault, target_keyvaults, options).await
            }
            Commands::ListKeyvaults {
                subscriptions,
                resource_groups,
            } => run_list_keyvaults(&session, subscriptions.clone(), resource_groups.clone()).await,
            Commands::ShowDiffs {
                source_keyvault,
                target_keyvaults,
            } => run_show_diffs(&session, source_keyvault, target_keyvaults).await,
        }
    })
}

fn is_auth_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<keyvault_sync::Error>(), Some(keyvault_sync::Error::Auth(_))))
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("KEYVAULT_SYNC_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("keyvault_sync=debug")
        } else {
            EnvFilter::new("keyvault_sync=warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(RunStatus::Clean) => {}
        Ok(RunStatus::ItemsFailed) => {
            eprintln!("⚠️  Some items failed; see the ERROR rows above.");
            std::process::exit(EXIT_ITEMS_FAILED);
        }
        Err(e) => {
            eprintln!("\nError: {:#}", e);
            if is_auth_failure(&e) {
                eprintln!("\n💡 Log in with 'az login', or set AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET");
            }
            std::process::exit(1);
        }
    }
}
