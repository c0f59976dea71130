use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use console_proxy::api::{self, AppState};
use console_proxy::config::AppConfig;
use console_proxy::engine::DockerEngine;
use console_proxy::exec::ExecManager;
use console_proxy::session::SessionRegistry;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Interactive container exec gateway over WebSocket.")]
struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH", env = "CONSOLE_PROXY_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to (overrides config)
    #[arg(long)]
    bind: Option<String>,
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if cli.print_config {
        let rendered =
            toml::to_string_pretty(&config).context("serializing configuration to TOML")?;
        print!("{rendered}");
        return Ok(());
    }

    init_logging(&cli, &config);
    serve(config)
}

/// Resolve the log level: `-v` flags win over the configured level.
fn effective_log_level(cli: &Cli, config: &AppConfig) -> String {
    match cli.verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_logging(cli: &Cli, config: &AppConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = effective_log_level(cli, config);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("console_proxy={level},tower_http={level}"))
    });

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(io::stderr().is_terminal()))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn serve(config: AppConfig) -> Result<()> {
    let engine = DockerEngine::new(&config.docker.socket, config.docker.api_version.clone());
    if let Err(err) = engine.ping().await {
        warn!(
            "docker daemon at {} is not reachable yet: {}",
            engine.socket().display(),
            err
        );
    }

    let exec = ExecManager::new(Arc::new(engine), config.exec.tty, config.exec.privileged);
    let state = AppState::new(
        exec,
        SessionRegistry::new(config.exec.single_session),
        config.keepalive.pong_wait(),
        config.keepalive.write_wait(),
    );
    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(
        "console proxy listening on {} (single session: {})",
        addr, config.exec.single_session
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("console proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
