//! Listbridge - keeps an Asana bug project and a Slack List in step

use anyhow::Context;
use clap::{Parser, Subcommand};
use listbridge_clients::{AsanaClient, SlackListClient};
use listbridge_core::config::BindMode;
use listbridge_core::BridgeConfig;
use listbridge_gateway::start_gateway;
use listbridge_sync::{bootstrap_mappings, ChangeRouter, EchoDetector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "listbridge=info,tower_http=info";

#[derive(Parser)]
#[command(
    name = "listbridge",
    about = "Two-way sync between an Asana project and a Slack List"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (missing file means defaults plus environment)
    #[arg(short, long, global = true, default_value = "listbridge.toml")]
    config: PathBuf,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap mappings and serve webhooks (default)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// lan or loopback
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Bootstrap mappings, print what was found, and exit
    Check,
    /// Register a tracker webhook for the configured project
    RegisterWebhook {
        /// Public URL of this server's /asana-webhook endpoint
        #[arg(long)]
        target: String,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.dump_config {
        print!("{}", BridgeConfig::default().to_toml());
        return Ok(());
    }

    let _log_guard = init_logging(cli.log_json, cli.log_file.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve { port: None, bind: None }) {
        Commands::Serve { port, bind } => {
            let mut config = load_config(&cli.config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = match bind.as_str() {
                    "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
                    _ => BindMode::Lan,
                };
            }
            serve(config).await?;
        }

        Commands::Check => {
            let config = load_config(&cli.config)?;
            let (tracker, list) = clients(&config)?;
            let boot = bootstrap_mappings(tracker.as_ref(), list.as_ref(), &config).await?;
            println!("tracker project {}", config.tracker.project_id);
            println!("  sections:      {}", boot.summary.sections);
            println!("  custom fields: {}", boot.summary.custom_fields);
            println!("list {}", config.list.list_id);
            println!("  columns:       {}", boot.summary.columns);
            println!("  rows:          {}", boot.summary.rows);
            match boot.mapper.link_column() {
                Some(column) => println!("  link column:   {}", column),
                None => println!("  link column:   (none; rows cannot be correlated)"),
            }
        }

        Commands::RegisterWebhook { target } => {
            let config = load_config(&cli.config)?;
            let (tracker, _) = clients(&config)?;
            let hook = tracker
                .create_webhook(&target)
                .await
                .context("registering tracker webhook")?;
            println!("webhook {} -> {} (active: {})", hook.id, hook.target, hook.active);
            println!("the signing secret was sent to the running gateway in the handshake");
        }

        Commands::Version => {
            println!("listbridge v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn init_logging(json: bool, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("--log-file {} has no file name", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let plain = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let json = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();
    Ok(guard)
}

fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let mut config = BridgeConfig::load(path)?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn clients(config: &BridgeConfig) -> anyhow::Result<(Arc<AsanaClient>, Arc<SlackListClient>)> {
    let access_token = config
        .tracker
        .access_token
        .clone()
        .context("tracker access token not set")?;
    let bot_token = config.list.bot_token.clone().context("list bot token not set")?;

    let tracker = AsanaClient::new(access_token, config.tracker.project_id.clone())
        .with_base_url(config.tracker.base_url.clone());
    let list = SlackListClient::new(bot_token).with_base_url(config.list.base_url.clone());
    Ok((Arc::new(tracker), Arc::new(list)))
}

async fn serve(config: BridgeConfig) -> anyhow::Result<()> {
    let (tracker, list) = clients(&config)?;
    let boot = bootstrap_mappings(tracker.as_ref(), list.as_ref(), &config)
        .await
        .context("bootstrapping mappings")?;

    let mut echo = EchoDetector::new(config.sync.echo_ttl());
    if let Some(max) = config.sync.echo_max_entries {
        echo = echo.with_max_entries(max);
    }
    info!(
        echo_ttl_ms = config.sync.echo_ttl_ms,
        settle_delay_ms = config.sync.settle_delay_ms,
        "sync settings"
    );

    let router = ChangeRouter::new(
        tracker,
        list,
        config.list.list_id.clone(),
        Arc::new(boot.mapper),
        Arc::new(echo),
    )
    .with_settle_delay(config.sync.settle_delay());

    start_gateway(router, &config).await
}
