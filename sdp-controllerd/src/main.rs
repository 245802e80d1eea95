mod api;
mod config;
mod discovery;
mod policy;
mod server;
mod tls;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use crate::config::Config;
use crate::discovery::DiscoveryService;
use crate::policy::PolicyStore;

#[derive(Debug, Parser)]
#[command(name = "sdp-controllerd", version, about = "SDP controller: mutual-TLS service discovery")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// CA bundle that client certificates must chain to
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Server certificate
    #[arg(short = 'c', long)]
    certificate: Option<PathBuf>,

    /// Server private key
    #[arg(short = 'k', long)]
    key: Option<PathBuf>,

    /// Address to bind to
    #[arg(short = 'b', long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Services definition file
    #[arg(long)]
    services: Option<PathBuf>,

    /// Clients definition file
    #[arg(long)]
    clients: Option<PathBuf>,

    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    /// Command line values win over the config file
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(path) = &self.ca_cert {
            config.tls.ca_cert = Some(path.clone());
        }
        if let Some(path) = &self.certificate {
            config.tls.certificate = Some(path.clone());
        }
        if let Some(path) = &self.key {
            config.tls.key = Some(path.clone());
        }
        if let Some(path) = &self.services {
            config.policy.services = path.clone();
        }
        if let Some(path) = &self.clients {
            config.policy.clients = path.clone();
        }

        if self.bind.is_some() || self.port.is_some() {
            let current: SocketAddr = config
                .api
                .listen
                .parse()
                .with_context(|| format!("Invalid listen address: {}", config.api.listen))?;
            let ip = self.bind.unwrap_or(current.ip());
            let port = self.port.unwrap_or(current.port());
            config.api.listen = SocketAddr::new(ip, port).to_string();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "sdp_controllerd=debug"
    } else {
        "sdp_controllerd=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("Starting sdp-controllerd {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };
    cli.apply(&mut config)?;

    // Trust material and policy must be valid before anything is served
    let tls_paths = config.tls.resolve()?;
    let tls = tls::server_config(&tls_paths)?;

    let services = policy::files::load_services(&config.policy.services)?;
    let clients = policy::files::load_clients(&config.policy.clients)?;
    let store = PolicyStore::build(services, clients).context("Failed to build policy store")?;
    tracing::info!(
        services = store.service_count(),
        clients = store.client_count(),
        "Policy loaded"
    );

    let app = api::routes::router(api::routes::AppState {
        discovery: Arc::new(DiscoveryService::new(
            Arc::new(store),
            env!("CARGO_PKG_VERSION"),
        )),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("Discovery listening on {}", config.api.listen);

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, tls, app, server_cancel).await {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    if let Err(e) = server_handle.await {
        tracing::error!("Server task error: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "sdp-controllerd",
            "--ca-cert",
            "/tmp/ca.crt",
            "-c",
            "/tmp/server.crt",
            "-k",
            "/tmp/server.key",
            "-p",
            "9443",
            "--clients",
            "/etc/sdp/clients.yaml",
        ]);

        let mut config = Config::default();
        cli.apply(&mut config).unwrap();

        assert_eq!(config.api.listen, "0.0.0.0:9443");
        assert_eq!(config.policy.clients, PathBuf::from("/etc/sdp/clients.yaml"));
        assert_eq!(config.policy.services, PathBuf::from("services.yaml"));
        assert_eq!(config.tls.resolve().unwrap().ca_cert, PathBuf::from("/tmp/ca.crt"));
    }

    #[test]
    fn test_bind_address_override() {
        let cli = Cli::parse_from(["sdp-controllerd", "-b", "127.0.0.1"]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();
        assert_eq!(config.api.listen, "127.0.0.1:8443");
    }

    #[test]
    fn test_missing_key_is_reported() {
        let cli = Cli::parse_from(["sdp-controllerd", "--ca-cert", "ca.crt", "-c", "server.crt"]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();
        assert!(config.tls.resolve().is_err());
    }
}
