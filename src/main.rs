use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ratatosk::config::{parse_bind_addr, ProxyConfig};
use ratatosk::http_server::HttpServer;
use ratatosk::resolver::DnsResolver;
use ratatosk::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let matches = Command::new("ratatosk")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Caching, rule-routed DNS reverse proxy")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Config file (TOML)"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .action(ArgAction::SetTrue)
                .help("Validate the config file and exit"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = match ProxyConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ratatosk: {}", err);
            std::process::exit(1);
        }
    };

    if matches.get_flag("test") {
        println!("ratatosk: config file test ok");
        return Ok(());
    }

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logger.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &config_path {
        Some(path) => info!("serving with config from {}", path.display()),
        None => info!("serving with built-in default config"),
    }

    let pid_file = config.pid.clone();
    if let Some(path) = &pid_file {
        std::fs::write(path, std::process::id().to_string())?;
        info!("wrote pid file {}", path);
    }

    let resolver = DnsResolver::new(config.clone()).await?;

    for (scheme, addr) in &config.bind {
        let bind_addr = parse_bind_addr(addr)?;
        let shutdown_rx = resolver.subscribe_shutdown();

        match scheme.as_str() {
            "udp" => {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move {
                    if let Err(err) = server::run_udp_server(bind_addr, resolver, shutdown_rx).await
                    {
                        error!("UDP server failed: {}", err);
                    }
                });
            }
            "tcp" => {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move {
                    if let Err(err) = server::run_tcp_server(bind_addr, resolver, shutdown_rx).await
                    {
                        error!("TCP server failed: {}", err);
                    }
                });
            }
            "http" => {
                let http = HttpServer::new(Arc::clone(&resolver), bind_addr);
                tokio::spawn(async move {
                    if let Err(err) = http.start(shutdown_rx).await {
                        error!("HTTP server failed: {}", err);
                    }
                });
            }
            other => warn!("ignoring unsupported bind scheme '{}'", other),
        }
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("terminate received, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("hangup received, reloading config");
                match ProxyConfig::load(config_path.as_deref()) {
                    Ok(config) => {
                        if let Err(err) = resolver.reload(config) {
                            error!("reload failed: {}", err);
                        }
                    }
                    Err(err) => error!("reload failed: {}", err),
                }
            }
        }
    }

    resolver.shutdown();
    // Give listeners a beat to drain before the runtime goes away
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(path) = &pid_file {
        if let Err(err) = std::fs::remove_file(path) {
            warn!("cannot remove pid file {}: {}", path, err);
        }
    }

    Ok(())
}
