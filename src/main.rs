//! overlay-fw - iptables rule keeper for overlay network hosts
//!
//! # Usage
//!
//! ```bash
//! # Keep the rules in place until SIGINT/SIGTERM, then remove them
//! overlay-fw run --network 10.1.0.0/16 --lease-subnet 10.1.5.0/24
//!
//! # One-shot commands
//! overlay-fw rules --format json   # Print the desired rule sets
//! overlay-fw check                 # Exit non-zero if any rule is missing
//! overlay-fw teardown              # Remove every managed rule once
//! overlay-fw version               # Build information
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use ipnetwork::IpNetwork;
use overlay_fw::FirewallBackend;
use overlay_fw::audit::{self, AuditLog};
use overlay_fw::config::{self, ConfigOverrides, DaemonConfig};
use overlay_fw::core::builders::Concern;
use overlay_fw::core::error::{Error, IptablesErrorPattern, Result};
use overlay_fw::core::iptables::{Family, IptablesCommand};
use overlay_fw::core::resync::{delete_rules, setup_and_ensure};
use overlay_fw::core::rule::RuleSet;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use strum::IntoEnumIterator;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

shadow_rs::shadow!(build);

/// Audit entries read back when `check` finds drift
const RECENT_EVENTS_SCANNED: usize = 200;

/// Entries shown per drifted concern
const RECENT_EVENTS_SHOWN: usize = 3;

#[derive(Parser)]
#[command(name = "overlay-fw")]
#[command(about = "Keeps the iptables rules of an overlay network host in place", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: ConfigArgs,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that touches the firewall
#[derive(Args)]
struct ConfigArgs {
    /// Configuration file (default: ~/.config/overlay-fw/config.json)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overlay network CIDR, overriding the configuration file
    #[arg(long, global = true, value_name = "CIDR")]
    network: Option<IpNetwork>,

    /// This host's lease inside the overlay network
    #[arg(long, global = true, value_name = "CIDR")]
    lease_subnet: Option<IpNetwork>,

    /// Explicit iptables or ip6tables binary
    #[arg(long, global = true, value_name = "PATH")]
    iptables: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the rules in place until interrupted, then remove them
    Run {
        /// Seconds between existence checks (1-3600)
        #[arg(long, value_name = "SECONDS")]
        resync_period: Option<u64>,
        /// Also manage the INPUT admission rules
        #[arg(long)]
        manage_input: bool,
    },
    /// Print the desired rule sets
    Rules {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Check whether every managed rule is present
    Check,
    /// Remove every managed rule once
    Teardown,
    /// Show build information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_ref());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, log_file: Option<&PathBuf>) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_max_level(level)
                    .with_ansi(false)
                    .with_writer(file)
                    .init();
                return;
            }
            Err(e) => eprintln!("Warning: cannot open log file {}: {e}", path.display()),
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints an error with operator hints
fn report(e: &Error) {
    eprintln!("Error: {e}");

    let detail = match e {
        Error::Config(_) => return,
        Error::EngineUnavailable(msg) => msg.clone(),
        _ => e.stderr().map_or_else(|| e.to_string(), str::to_string),
    };

    let translation = IptablesErrorPattern::match_error(&detail);
    eprintln!("  {}", translation.user_message);
    for suggestion in &translation.suggestions {
        eprintln!("  - {suggestion}");
    }
}

async fn handle_cli(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            resync_period,
            manage_input,
        } => {
            let config = resolve_config(
                &cli.options,
                ConfigOverrides {
                    resync_period_secs: resync_period,
                    manage_input: manage_input.then_some(true),
                    ..ConfigOverrides::default()
                },
            )
            .await?;
            Ok(run_daemon(config).await)
        }
        Commands::Rules { format } => {
            let config = resolve_config(&cli.options, ConfigOverrides::default()).await?;
            print_rules(&config, format).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let config = resolve_config(&cli.options, ConfigOverrides::default()).await?;
            check(&config).await
        }
        Commands::Teardown => {
            let config = resolve_config(&cli.options, ConfigOverrides::default()).await?;
            teardown(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Loads the configuration file and layers the command-line values on top
async fn resolve_config(args: &ConfigArgs, overrides: ConfigOverrides) -> Result<DaemonConfig> {
    let mut config = config::load_config(args.config.as_deref()).await?;
    config.apply_overrides(ConfigOverrides {
        network: args.network,
        lease_subnet: args.lease_subnet,
        iptables_path: args.iptables.clone(),
        ..overrides
    });
    config.validate()?;
    Ok(config)
}

fn print_version() {
    println!("overlay-fw {}", build::PKG_VERSION);
    println!("commit:     {}", build::SHORT_COMMIT);
    println!("clean tree: {}", build::GIT_CLEAN);
    println!("built:      {}", build::BUILD_TIME);
    println!("rustc:      {}", build::RUST_VERSION);
}

fn family(config: &DaemonConfig) -> Result<Family> {
    config
        .family()
        .ok_or_else(|| Error::Config("no overlay network configured".to_string()))
}

fn open_audit_log() -> Option<AuditLog> {
    if let Err(e) = overlay_fw::utils::ensure_dirs() {
        warn!("Failed to create state directory: {e}");
        return None;
    }
    match AuditLog::new() {
        Ok(audit) => Some(audit),
        Err(e) => {
            warn!("Audit logging disabled: {e}");
            None
        }
    }
}

/// Resolves when SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}

/// Runs one resync loop per enabled concern until a signal arrives.
///
/// A loop that fails to start leaves its concern unmanaged while the others
/// keep running. Every running loop tears its rules down before this returns.
async fn run_daemon(config: DaemonConfig) -> ExitCode {
    let family = match family(&config) {
        Ok(family) => family,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };
    let audit = open_audit_log();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for concern in config.enabled_concerns() {
        let config = config.clone();
        let audit = audit.clone();
        let mut stop_rx = stop_rx.clone();

        tasks.spawn(async move {
            let result = setup_and_ensure(
                concern.as_ref(),
                family,
                config.iptables_path.as_deref(),
                |backend| config.rules_for(concern, backend.has_random_fully()),
                config.resync_period(),
                audit,
                async move {
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                },
            )
            .await;
            (concern, result)
        });
    }

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut stopping = false;
    let mut failed = false;

    loop {
        tokio::select! {
            () = &mut signal, if !stopping => {
                stopping = true;
                let _ = stop_tx.send(true);
            }
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                match joined {
                    Ok((concern, Ok(()))) => debug!("[{concern}] Resync loop finished"),
                    Ok((concern, Err(e))) => {
                        error!("[{concern}] Resync loop failed to start, rules stay unmanaged: {e}");
                        report(&e);
                        failed = true;
                    }
                    Err(e) => {
                        error!("Resync task aborted: {e}");
                        failed = true;
                    }
                }
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        info!("All managed rules removed");
        ExitCode::SUCCESS
    }
}

/// Probes `--random-fully` support, assuming none when iptables is unavailable
async fn probe_random_fully(config: &DaemonConfig) -> Result<bool> {
    match IptablesCommand::open(family(config)?, config.iptables_path.as_deref()).await {
        Ok(backend) => Ok(backend.has_random_fully()),
        Err(Error::EngineUnavailable(msg)) => {
            warn!("{msg}; rendering rules without --random-fully");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn print_rules(config: &DaemonConfig, format: OutputFormat) -> Result<()> {
    let random_fully = if config.manage_masquerade {
        probe_random_fully(config).await?
    } else {
        false
    };

    let mut sets: Vec<(Concern, RuleSet)> = Vec::new();
    for concern in config.enabled_concerns() {
        sets.push((concern, config.rules_for(concern, random_fully)?));
    }

    match format {
        OutputFormat::Text => {
            for (i, (concern, rules)) in sets.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                println!("# {concern}");
                for rule in rules {
                    println!("{rule}");
                }
            }
        }
        OutputFormat::Json => {
            let map: BTreeMap<String, &RuleSet> = sets
                .iter()
                .map(|(concern, rules)| (concern.to_string(), rules))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
    }

    Ok(())
}

/// Reports missing rules per concern without changing anything
async fn check(config: &DaemonConfig) -> Result<ExitCode> {
    let backend = IptablesCommand::open(family(config)?, config.iptables_path.as_deref()).await?;
    let mut missing_total = 0;

    for concern in config.enabled_concerns() {
        let rules = config.rules_for(concern, backend.has_random_fully())?;
        let mut missing = Vec::new();
        for rule in &rules {
            if !backend.exists(&rule.table, &rule.chain, &rule.tokens).await? {
                missing.push(rule);
            }
        }

        if missing.is_empty() {
            println!("{concern}: in sync ({} rules)", rules.len());
        } else {
            println!("{concern}: {} of {} rules missing", missing.len(), rules.len());
            for rule in &missing {
                println!("  {rule}");
            }
            print_recent_repairs(concern).await;
        }
        missing_total += missing.len();
    }

    Ok(if missing_total == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Prints the last few audit entries for `concern`, if any were recorded
async fn print_recent_repairs(concern: Concern) {
    let Ok(audit) = AuditLog::new() else { return };
    let events = match audit.read_recent(RECENT_EVENTS_SCANNED).await {
        Ok(events) => events,
        Err(e) => {
            debug!("No audit history: {e}");
            return;
        }
    };

    let name = concern.to_string();
    let recent: Vec<_> = events
        .iter()
        .filter(|event| event.rule_set == name)
        .take(RECENT_EVENTS_SHOWN)
        .collect();
    if recent.is_empty() {
        return;
    }

    println!("  recent activity:");
    for event in recent {
        let outcome = match &event.error {
            Some(e) => format!("failed: {e}"),
            None => "ok".to_string(),
        };
        println!(
            "    {} {:?} {outcome}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            event.event_type
        );
    }
}

/// Deletes every rule set that can be built from the configuration
async fn teardown(config: &DaemonConfig) -> Result<()> {
    let backend = IptablesCommand::open(family(config)?, config.iptables_path.as_deref()).await?;
    let audit = open_audit_log();

    for concern in Concern::iter() {
        let rules = match config.rules_for(concern, backend.has_random_fully()) {
            Ok(rules) => rules,
            Err(e) => {
                debug!("[{concern}] Skipping teardown: {e}");
                continue;
            }
        };

        delete_rules(&backend, &rules).await;
        info!("[{concern}] Removed managed rules");
        if let Some(audit) = &audit {
            audit::log_teardown(audit, concern.as_ref(), rules.len()).await;
        }
    }

    Ok(())
}
