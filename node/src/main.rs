use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use p2pshare_agent::{DirectoryApi, HttpDirectoryClient, PeerAgent};
use p2pshare_directory::DirectoryService;
use p2pshare_rpc::{
    bind_listener, control_router, directory_router, serve, transfer_router, ControlState,
};
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod version;

use config::{NodeConfig, Role};
use version::{long_version, P2PSHARE_VERSION};

fn build_cli() -> Command {
    Command::new("p2pshare-node")
        .version(P2PSHARE_VERSION)
        .long_version(long_version())
        .about("p2pshare directory service and peer agent")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "compact"])
                .help("Select log output format")
                .global(true),
        )
        .subcommand(
            Command::new("directory")
                .about("Run the directory service")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Override the bind host"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("Override the directory port"),
                ),
        )
        .subcommand(
            Command::new("peer")
                .about("Run a peer agent: transfer endpoint, control API and heartbeat")
                .arg(
                    Arg::new("directory")
                        .long("directory")
                        .value_name("URL")
                        .help("Directory service URL"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("Override the transfer port"),
                )
                .arg(
                    Arg::new("control-port")
                        .long("control-port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("Override the loopback control API port"),
                )
                .arg(
                    Arg::new("shared-dir")
                        .long("shared-dir")
                        .value_name("DIR")
                        .help("Directory whose files are shared"),
                )
                .arg(
                    Arg::new("download-dir")
                        .long("download-dir")
                        .value_name("DIR")
                        .help("Directory downloads are written to"),
                )
                .arg(
                    Arg::new("peer-id")
                        .long("peer-id")
                        .value_name("ID")
                        .help("Use a fixed peer id instead of a generated one"),
                ),
        )
        .subcommand(
            Command::new("stats")
                .about("Print /stats of a running directory service")
                .arg(
                    Arg::new("directory")
                        .long("directory")
                        .value_name("URL")
                        .help("Directory service URL"),
                ),
        )
}

fn apply_overrides(matches: &ArgMatches, config: &mut NodeConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    match config.role {
        Role::Directory => {
            if let Some(host) = matches.try_get_one::<String>("host").ok().flatten() {
                config.directory_host = host.clone();
            }
            if let Some(port) = matches.try_get_one::<u16>("port").ok().flatten() {
                config.directory_port = *port;
            }
        }
        Role::Peer => {
            if let Some(url) = matches.try_get_one::<String>("directory").ok().flatten() {
                config.directory_url = url.clone();
            }
            if let Some(port) = matches.try_get_one::<u16>("port").ok().flatten() {
                config.transfer_port = *port;
            }
            if let Some(port) = matches.try_get_one::<u16>("control-port").ok().flatten() {
                config.control_port = *port;
            }
            if let Some(dir) = matches.try_get_one::<String>("shared-dir").ok().flatten() {
                config.shared_dir = dir.into();
            }
            if let Some(dir) = matches.try_get_one::<String>("download-dir").ok().flatten() {
                config.download_dir = dir.into();
            }
            if let Some(id) = matches.try_get_one::<String>("peer-id").ok().flatten() {
                config.peer_id = id.clone();
            }
        }
    }
}

fn load_config_with_overrides(role: Role, matches: &ArgMatches) -> Result<NodeConfig> {
    let config_path = matches.get_one::<String>("config").map(|value| value.as_str());
    let mut config = NodeConfig::load(role, config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &NodeConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "compact" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}

async fn run_directory(config: NodeConfig) -> Result<()> {
    let service = DirectoryService::start(config.directory_config())
        .context("failed to start directory service")?;
    let listener = bind_listener(&config.directory_listen_addr()).await?;
    let local_addr = listener.local_addr()?;
    let node_id = format!("directory@{local_addr}");

    info!("p2pshare directory {} listening on {}", P2PSHARE_VERSION, local_addr);
    if let Some(path) = &config.config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let router = directory_router(service.clone(), node_id);
    let result = serve(listener, router, async {
        wait_for_ctrl_c().await;
        info!("Received shutdown signal");
    })
    .await;

    service.shutdown();
    result
}

async fn run_peer(config: NodeConfig) -> Result<()> {
    let transfer_listener = bind_listener(&config.transfer_listen_addr()).await?;
    let control_listener = bind_listener(&config.control_listen_addr()).await?;

    let mut agent_config = config.agent_config();
    agent_config.transfer_port = transfer_listener.local_addr()?.port();
    let agent = PeerAgent::new(agent_config).context("failed to build peer agent")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    info!(
        "Peer {} serving {} on {}",
        agent.peer_id(),
        config.shared_dir.display(),
        transfer_listener.local_addr()?
    );
    let transfer_server = tokio::spawn(serve(
        transfer_listener,
        transfer_router(config.shared_dir.clone()),
        stopped(stop_rx.clone()),
    ));

    // Without an initial registration the peer is unreachable; give up.
    if let Err(err) = agent.start().await {
        let _ = stop_tx.send(true);
        let _ = transfer_server.await;
        return Err(err).context("initial registration with the directory failed");
    }

    let exit = Arc::new(Notify::new());
    info!("Control API listening on {}", control_listener.local_addr()?);
    let control_server = tokio::spawn(serve(
        control_listener,
        control_router(ControlState::new(
            agent.clone(),
            exit.clone(),
            config.search_limit,
        )),
        stopped(stop_rx),
    ));

    tokio::select! {
        _ = wait_for_ctrl_c() => {
            info!("Received shutdown signal");
            agent.shutdown().await;
        }
        _ = exit.notified() => {
            info!("Exit requested through control API");
        }
    }

    let _ = stop_tx.send(true);
    for (name, server) in [("transfer", transfer_server), ("control", control_server)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("{} server failed: {:#}", name, err),
            Err(err) => error!("{} server task panicked: {}", name, err),
        }
    }

    info!("Peer {} stopped", agent.peer_id());
    Ok(())
}

async fn print_stats(config: &NodeConfig, matches: &ArgMatches) -> Result<()> {
    let url = matches
        .get_one::<String>("directory")
        .cloned()
        .unwrap_or_else(|| config.directory_url.clone());
    let client = HttpDirectoryClient::new(&url, Duration::from_secs(config.http_timeout_secs))?;
    let stats = client.stats().await.context("failed to fetch directory stats")?;
    println!("GET {}/stats -> 200 OK", client.base_url());
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("directory", sub)) => {
            let config = load_config_with_overrides(Role::Directory, sub)?;
            init_logging(&config)?;
            run_directory(config).await
        }
        Some(("peer", sub)) => {
            let config = load_config_with_overrides(Role::Peer, sub)?;
            init_logging(&config)?;
            run_peer(config).await
        }
        Some(("stats", sub)) => {
            let config_path = sub.get_one::<String>("config").map(String::as_str);
            let config = NodeConfig::load(Role::Peer, config_path)?;
            print_stats(&config, sub).await
        }
        _ => unreachable!("clap requires a subcommand"),
    }
}
