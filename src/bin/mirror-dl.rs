//! mirror-dl server - mirrors websites into downloadable zip archives.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use mirror_dl::server::{AppState, run_server};
use mirror_dl::{ActiveNames, AppConfig, Crawler, HttpCrawler, SessionController, retention};

struct CliArgs {
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

fn print_usage() {
    eprintln!("Usage: mirror-dl [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>  Config file (default: {})", AppConfig::default_path().display());
    eprintln!("      --host <HOST>    Bind address (default: 0.0.0.0)");
    eprintln!("  -p, --port <PORT>    Bind port (default: $PORT or {})", mirror_dl::config::DEFAULT_PORT);
    eprintln!("  -h, --help           Show this help");
    eprintln!();
    eprintln!("Logging is controlled with RUST_LOG (default: info).");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut cli = CliArgs {
        config: None,
        host: None,
        port: None,
    };

    let value = |i: usize, flag: &str| -> String {
        args.get(i).cloned().unwrap_or_else(|| {
            eprintln!("Error: {flag} requires a value");
            std::process::exit(1);
        })
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                cli.config = Some(PathBuf::from(value(i, "--config")));
            }
            "--host" => {
                i += 1;
                cli.host = Some(value(i, "--host"));
            }
            "-p" | "--port" => {
                i += 1;
                let raw = value(i, "--port");
                if let Ok(port) = raw.parse() {
                    cli.port = Some(port);
                } else {
                    eprintln!("Error: invalid port {raw}");
                    std::process::exit(1);
                }
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown option: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    cli
}

#[cfg(feature = "headless")]
fn build_crawler(config: &mirror_dl::CrawlConfig) -> Arc<dyn Crawler> {
    if config.headless.enabled {
        log::info!("Headless rendering enabled");
        let renderer = mirror_dl::crawl::render::HeadlessRenderer::new(
            config.headless.clone(),
            config.user_agent.clone(),
            config.request_timeout(),
        );
        return Arc::new(HttpCrawler::with_renderer(Arc::new(renderer)));
    }
    Arc::new(HttpCrawler::new())
}

#[cfg(not(feature = "headless"))]
fn build_crawler(config: &mirror_dl::CrawlConfig) -> Arc<dyn Crawler> {
    if config.headless.enabled {
        log::warn!("Headless rendering requested but not compiled in; saving pages as served");
    }
    Arc::new(HttpCrawler::new())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT"),
                    _ = sigterm.recv() => log::info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {e}");
                tokio::signal::ctrl_c().await.ok();
                log::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Received SIGINT");
    }
}

#[tokio::main]
async fn main() -> mirror_dl::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = parse_args();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let root = config.server.storage_root.clone();
    tokio::fs::create_dir_all(&root).await?;
    log::info!("Storing sites in {}", root.display());

    let active = ActiveNames::new();
    let controller = SessionController::new(
        build_crawler(&config.crawl),
        config.crawl.clone(),
        root.clone(),
        active.clone(),
    );

    let shutdown = CancellationToken::new();
    let sweeper = retention::spawn_sweeper(&config.retention, root, active, shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let state = AppState::new(Arc::new(controller), shutdown.clone());
    let served = run_server(&config.server, state).await;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    served
}
