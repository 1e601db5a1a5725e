//! WolfElect - Coordinator Election for WolfScale Sites
//!
//! Runs one site of a Bully-style election group, or queries a running one.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfelect::config::WolfElectConfig;
use wolfelect::error::{Error, Result};
use wolfelect::network::{Message, NetworkClient, NetworkServer};
use wolfelect::state::{
    CoordinatorClient, ElectionEngine, ElectionOutcome, ElectionSnapshot, HeartbeatOutcome,
    PeerRegistry, SiteId,
};

/// WolfElect - Coordinator Election for WolfScale Sites
#[derive(Parser)]
#[command(name = "wolfelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfelect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to logging.level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a site
    Start {
        /// Site id to run as (prompted for when absent from flags and config)
        #[arg(long)]
        id: Option<SiteId>,

        /// This site is recovering from a crash: hold an election right away
        #[arg(long)]
        recovering: bool,
    },

    /// Query the election state of a running site
    Status {
        /// Site address to query (host:port)
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        address: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfelect.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show site information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            WolfElectConfig::from_file(&cli.config)
                .ok()
                .map(|config| config.logging.level)
        })
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    match cli.command {
        Commands::Start { id, recovering } => {
            run_start(cli.config, id, recovering).await
        }
        Commands::Status { address, json } => {
            run_status(cli.config, address, json).await
        }
        Commands::Init { output, force } => {
            run_init(output, force)
        }
        Commands::Validate => {
            run_validate(cli.config)
        }
        Commands::Info => {
            run_info(cli.config)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the config file, or the built-in five-site layout if there is none
fn load_config(config_path: &Path) -> Result<WolfElectConfig> {
    if !config_path.exists() {
        tracing::warn!(
            "No configuration at {:?}, using the default five-site localhost layout",
            config_path
        );
        return Ok(WolfElectConfig::default());
    }

    match WolfElectConfig::from_file(config_path) {
        Ok(config) => Ok(config),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            Err(e)
        }
    }
}

/// Print a question and read one trimmed line of input
async fn prompt<R: AsyncRead + Unpin>(
    lines: &mut Lines<BufReader<R>>,
    question: &str,
) -> Result<Option<String>> {
    print!("{}", question);
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

/// Ask the operator which site this process runs as
async fn ask_site_id<R: AsyncRead + Unpin>(
    lines: &mut Lines<BufReader<R>>,
    registry: &PeerRegistry,
) -> Result<SiteId> {
    let ids = registry.ids();
    let question = format!("Enter the site id {:?}: ", ids);

    loop {
        let answer = prompt(lines, &question)
            .await?
            .ok_or_else(|| Error::Config("no site id given".into()))?;

        match answer.parse::<SiteId>() {
            Ok(id) if registry.contains(id) => return Ok(id),
            _ => println!("Unknown site id {:?}", answer),
        }
    }
}

fn describe_election(outcome: &ElectionOutcome) -> String {
    match outcome {
        ElectionOutcome::AlreadyInProgress => "an election is already in progress".to_string(),
        ElectionOutcome::Deferred { epoch, superiors } => {
            format!("higher sites {:?} are alive, deferring to them (epoch {})", superiors, epoch)
        }
        ElectionOutcome::Promoted { epoch, acknowledged } => format!(
            "became coordinator (epoch {}), acknowledged by {:?}",
            epoch, acknowledged
        ),
        ElectionOutcome::Stale { epoch } => format!("election epoch {} was superseded", epoch),
    }
}

fn describe_heartbeat(outcome: &HeartbeatOutcome) -> String {
    match outcome {
        HeartbeatOutcome::SelfIsCoordinator => "this site is the coordinator".to_string(),
        HeartbeatOutcome::Alive { coordinator_id } => {
            format!("coordinator {} answered", coordinator_id)
        }
        HeartbeatOutcome::Failed {
            coordinator_id,
            election,
        } => format!(
            "coordinator {} is unreachable; {}",
            coordinator_id,
            describe_election(election)
        ),
    }
}

/// Run one site
async fn run_start(config_path: PathBuf, id: Option<SiteId>, recovering: bool) -> Result<()> {
    tracing::info!("Starting WolfElect site...");

    let config = load_config(&config_path)?;
    let registry = Arc::new(config.registry()?);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let site_id = match id.or(config.node.id) {
        Some(id) if registry.contains(id) => id,
        Some(id) => return Err(Error::UnknownSite(id)),
        None => ask_site_id(&mut lines, &registry).await?,
    };
    let default_coordinator = config
        .default_coordinator()
        .unwrap_or_else(|| registry.highest());

    let transport = Arc::new(NetworkClient::new(
        config.connect_timeout(),
        config.call_timeout(),
    ));
    let engine = Arc::new(ElectionEngine::new(
        site_id,
        default_coordinator,
        Arc::clone(&registry),
        transport,
        config.election_config(),
    )?);

    // Bind before anything else; a site that cannot listen cannot take part
    let bind_address = config.bind_address(site_id)?;
    let server = match NetworkServer::bind(&bind_address, Arc::clone(&engine)).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", bind_address, e);
            return Err(e);
        }
    };
    println!(
        "Site {} is running with address {}",
        site_id,
        server.local_addr()?
    );

    let serving = Arc::clone(&server);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = serving.serve().await {
            tracing::error!("Network server error: {}", e);
        }
    });

    let recovering = if recovering {
        true
    } else {
        let answer = prompt(&mut lines, "Is this site recovering from a crash? (y/n): ").await?;
        matches!(answer.as_deref(), Some("y") | Some("Y") | Some("yes"))
    };
    if recovering {
        tracing::info!("Recovering from a crash, invoking election");
        let outcome = engine.start_election().await;
        println!("Election: {}", describe_election(&outcome));
    }

    let client = CoordinatorClient::new(Arc::clone(&engine));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = config.heartbeat_interval().map(|interval| {
        tokio::spawn(client.clone().run(interval, config.heartbeat_jitter(), shutdown_rx))
    });

    let mut stdin_open = true;
    loop {
        if stdin_open {
            println!("Press enter for site {} to communicate with the coordinator.", site_id);
        }

        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(_)) => {
                        let outcome = client.heartbeat().await;
                        println!("Heartbeat: {}", describe_heartbeat(&outcome));
                        println!();
                    }
                    Ok(None) => {
                        // Without a heartbeat loop there is nothing left to drive
                        if heartbeat_handle.is_none() {
                            break;
                        }
                        tracing::info!("stdin closed, continuing with automatic heartbeats");
                        stdin_open = false;
                    }
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    // Cleanup
    let _ = shutdown_tx.send(true);
    if let Some(handle) = heartbeat_handle {
        let _ = handle.await;
    }
    server.stop();
    let _ = server_handle.await;

    tracing::info!("WolfElect site {} shutdown complete", site_id);
    Ok(())
}

/// Query a running site's election state
async fn run_status(config_path: PathBuf, address: String, json: bool) -> Result<()> {
    let config = load_config(&config_path)?;
    let client = NetworkClient::new(config.connect_timeout(), config.call_timeout());

    match client.send(&address, Message::StatusRequest).await? {
        Message::StatusResponse {
            site_id,
            coordinator_id,
            phase,
            epoch,
        } => {
            let snapshot = ElectionSnapshot {
                site_id,
                coordinator_id,
                phase,
                epoch,
            };

            if json {
                let text = serde_json::to_string_pretty(&snapshot)
                    .map_err(|e| Error::Internal(e.to_string()))?;
                println!("{}", text);
            } else {
                println!("Site:         {}", snapshot.site_id);
                println!("Coordinator:  {}", snapshot.coordinator_id);
                println!("Phase:        {}", snapshot.phase);
                println!("Epoch:        {}", snapshot.epoch);
            }
            Ok(())
        }
        Message::Error { code, message } => Err(Error::Protocol(format!(
            "{} answered {:?}: {}",
            address, code, message
        ))),
        other => Err(Error::Protocol(format!(
            "{} answered with unexpected {}",
            address,
            other.type_name()
        ))),
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }

    let config_content = format!(
        "# WolfElect Configuration\n# Generated configuration file\n\n{}",
        WolfElectConfig::default().to_toml()?
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit [[sites]] to match your deployment, then start each site with:");
    println!("  wolfelect --config {} start --id <N>", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfElectConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            match config.node.id {
                Some(id) => println!("  Site ID: {}", id),
                None => println!("  Site ID: (prompted at startup)"),
            }
            println!("  Sites: {}", config.sites.len());
            if let Some(coordinator) = config.default_coordinator() {
                println!("  Default Coordinator: {}", coordinator);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show site information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfElectConfig::from_file(&config_path)?;

    println!("WolfElect Site Information");
    println!("==========================");
    println!();
    match config.node.id {
        Some(id) => {
            println!("Site ID:          {}", id);
            println!("Bind Address:     {}", config.bind_address(id)?);
        }
        None => println!("Site ID:          (prompted at startup)"),
    }
    if let Some(coordinator) = config.default_coordinator() {
        println!("Coordinator:      {} (default)", coordinator);
    }
    println!();
    println!("Sites:");
    for site in &config.sites {
        println!("  {:>4}  {}", site.id, site.address);
    }
    println!();
    println!("Election Configuration:");
    println!("  Call Timeout:   {} ms", config.election.call_timeout_ms);
    println!("  Connect:        {} ms", config.election.connect_timeout_ms);
    match config.heartbeat_interval() {
        Some(interval) => println!("  Heartbeat:      {:?} (+ up to {:?} jitter)", interval, config.heartbeat_jitter()),
        None => println!("  Heartbeat:      on demand"),
    }

    Ok(())
}
