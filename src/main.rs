//! ddns-warden - keep DNS records pointed at this host.

use clap::{Parser, Subcommand};
use ddns_warden::config::Settings;
use ddns_warden::resolver::{IpResolver, ResolveIp};
use ddns_warden::supervisor::{SettingsLoopFactory, Supervisor};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ddns-warden")]
#[command(about = "Dynamic DNS daemon keeping provider records pointed at this host")]
#[command(version)]
struct Cli {
    /// Path to config file (.toml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Run,

    /// Print the IP that would be published
    Ip,

    /// Validate configuration
    Check,
}

fn get_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }

    let candidates = Settings::default_paths();
    candidates
        .iter()
        .find(|candidate| candidate.exists())
        .cloned()
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

fn init_logging(settings: &Settings, verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &settings.log_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = get_config_path(cli.config);
    let settings = Settings::load_from(&config_path)?;

    init_logging(&settings, cli.verbose)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(settings).await?,
        Commands::Ip => cmd_ip(settings).await?,
        Commands::Check => cmd_check(settings),
    }

    Ok(())
}

async fn cmd_run(settings: Settings) -> anyhow::Result<()> {
    settings.check()?;

    tracing::info!(
        provider = %settings.provider,
        domains = settings.domains.len(),
        "Starting ddns-warden (interval: {}s)",
        settings.interval().as_secs()
    );

    let domains = settings.domains.clone();
    let settings = Arc::new(settings);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let factory = Arc::new(SettingsLoopFactory::new(settings));
    let supervisor = Supervisor::new(factory, shutdown_rx);
    let mut run = tokio::spawn(async move { supervisor.run(domains).await });

    let report = tokio::select! {
        report = &mut run => report?,
        signal = wait_for_signal() => {
            tracing::info!("Received {}, shutting down", signal?);
            let _ = shutdown_tx.send(true);
            run.await?
        }
    };

    if !report.abandoned.is_empty() {
        let names: Vec<&str> = report
            .abandoned
            .iter()
            .map(|domain| domain.domain_name.as_str())
            .collect();
        tracing::error!("Abandoned domains: {}", names.join(", "));
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

async fn cmd_ip(settings: Settings) -> anyhow::Result<()> {
    let resolver = IpResolver::from_settings(&settings)?;
    let ip = resolver.current_ip().await?;
    println!("{}", ip);
    Ok(())
}

fn cmd_check(settings: Settings) {
    println!("Validating configuration...\n");

    match settings.check() {
        Ok(()) => {
            println!("  provider: {}", settings.provider);
            for domain in &settings.domains {
                for sub_domain in &domain.sub_domains {
                    println!("  record:   {}", domain.fqdn(sub_domain));
                }
            }
            println!("  interval: {}s", settings.interval().as_secs());
            println!("\nConfiguration is valid.");
        }
        Err(e) => {
            println!("FAILED - {}", e);
            std::process::exit(1);
        }
    }
}
