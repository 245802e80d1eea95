use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sdp_client::config::ClientConfig;
use sdp_client::discover::HttpsDiscovery;
use sdp_client::orchestrator::{AccessOrchestrator, Selection};
use sdp_client::spa::OpenSpaGateway;
use shared::types::Service;
use tokio_util::sync::CancellationToken;

const EXIT_UNEXPECTED: u8 = 1;
const EXIT_BAD_INPUT: u8 = 2;
const EXIT_UNKNOWN_SERVICE: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "sdp-client", version, about = "Gain access to services authorized by an SDP controller")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Controller address (host:port)
    #[arg(short = 's', long, global = true)]
    server: Option<String>,

    /// Certificate of the CA
    #[arg(long, global = true)]
    ca_cert: Option<PathBuf>,

    /// Client certificate
    #[arg(short = 'c', long, global = true)]
    certificate: Option<PathBuf>,

    /// Client key
    #[arg(short = 'k', long, global = true)]
    key: Option<PathBuf>,

    /// OpenSPA executable
    #[arg(long, global = true)]
    openspa_path: Option<PathBuf>,

    /// OpenSPA client OSPA file
    #[arg(long, global = true)]
    openspa_ospa: Option<PathBuf>,

    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the services this client is authorized for
    Services,
    /// Open and hold access to one or all authorized services
    Access {
        /// Service name
        name: Option<String>,
        /// Access every authorized service
        #[arg(short = 'a', long)]
        all: bool,
    },
}

/// Invalid or missing user input
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct BadInput(String);

impl Cli {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server = Some(server.clone());
        }
        if let Some(path) = &self.ca_cert {
            config.tls.ca_cert = Some(path.clone());
        }
        if let Some(path) = &self.certificate {
            config.tls.certificate = path.clone();
        }
        if let Some(path) = &self.key {
            config.tls.key = path.clone();
        }
        if let Some(path) = &self.openspa_path {
            config.openspa.path = path.clone();
        }
        if let Some(path) = &self.openspa_ospa {
            config.openspa.ospa = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "sdp_client=debug" } else { "sdp_client=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<BadInput>().is_some() {
        return EXIT_BAD_INPUT;
    }
    match e.downcast_ref::<sdp_client::Error>() {
        Some(sdp_client::Error::UnknownService(_)) | Some(sdp_client::Error::Unauthorized(_)) => {
            EXIT_UNKNOWN_SERVICE
        }
        Some(sdp_client::Error::InvalidRequest(_)) => EXIT_BAD_INPUT,
        _ => EXIT_UNEXPECTED,
    }
}

fn parse_selection(name: Option<String>, all: bool) -> Result<Selection> {
    match (name, all) {
        (_, true) => Ok(Selection::All),
        (Some(name), false) => Ok(Selection::Named(name)),
        (None, false) => {
            Err(BadInput("missing service name (or use -a for all services)".to_string()).into())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    cli.apply(&mut config);

    // Validate input before anything touches the network
    let selection = match &cli.command {
        Command::Services => None,
        Command::Access { name, all } => Some(parse_selection(name.clone(), *all)?),
    };

    let server = config
        .server
        .clone()
        .ok_or_else(|| BadInput("missing controller address (--server)".to_string()))?;
    let ca_cert = config
        .tls
        .ca_cert
        .clone()
        .ok_or_else(|| BadInput("missing CA certificate (--ca-cert)".to_string()))?;
    let controller = resolve_controller(&server).await?;

    let transport =
        HttpsDiscovery::from_files(&server, &ca_cert, &config.tls.certificate, &config.tls.key)?;

    let cancel = CancellationToken::new();
    let gateway = Arc::new(OpenSpaGateway::new(&config.openspa, cancel.clone()));
    let orchestrator = AccessOrchestrator::new(
        Arc::clone(&gateway),
        controller,
        config.access.stagger(),
        cancel.clone(),
    );

    let discovery = orchestrator
        .discover(&transport)
        .await
        .context("Failed to perform discover exchange")?;

    let Some(selection) = selection else {
        print_services(&discovery.services);
        return Ok(());
    };

    let available: Vec<String> = discovery.services.iter().map(|s| s.name.clone()).collect();
    let services = match selection.apply(discovery.services) {
        Ok(services) => services,
        Err(e @ sdp_client::Error::UnknownService(_)) => {
            tracing::warn!("Unknown service");
            tracing::info!(services = %available.join(", "), "You have access to these services");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let session = orchestrator.launch(services).await;
    let session_handle = tokio::spawn(session.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    join_session(session_handle).await;
    gateway.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Returns false when the session task panicked or was aborted
async fn join_session(handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Access session error: {}", e);
            false
        }
    }
}

/// The controller must resolve to an address the SPA agent can target
async fn resolve_controller(server: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(server)
        .await
        .map_err(|e| BadInput(format!("invalid controller address {}: {}", server, e)))?;
    addrs
        .next()
        .ok_or_else(|| BadInput(format!("controller address {} did not resolve", server)).into())
}

fn print_services(services: &[Service]) {
    if services.is_empty() {
        println!("You do not have access to any services");
        return;
    }

    println!("You have access to the following services:");
    println!(
        "|{:<26}|{:<26}|{:<18}|{:<12}|{:<20}|",
        "Name", "IP", "Port(s)", "Access Type", "Tag(s)"
    );
    println!("{}", "-".repeat(108));

    for service in services {
        let addresses: Vec<String> = service.addresses.iter().map(ToString::to_string).collect();
        println!(
            "|{:<26}|{:<26}|{:<18}|{:<12}|{:<20}|",
            service.name,
            addresses.join(", "),
            service.ports_display().join(", "),
            service.access_types_display().join(", "),
            service.tags.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_requires_name_or_all() {
        assert_eq!(parse_selection(None, true).unwrap(), Selection::All);
        assert_eq!(
            parse_selection(Some("web".to_string()), false).unwrap(),
            Selection::Named("web".to_string())
        );

        let err = parse_selection(None, false).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_BAD_INPUT);
    }

    #[test]
    fn test_exit_codes() {
        let unknown = anyhow::Error::from(sdp_client::Error::UnknownService("mail".to_string()));
        assert_eq!(exit_code(&unknown), EXIT_UNKNOWN_SERVICE);

        let denied = anyhow::Error::from(sdp_client::Error::Unauthorized("no".to_string()))
            .context("Failed to perform discover exchange");
        assert_eq!(exit_code(&denied), EXIT_UNKNOWN_SERVICE);

        let spa = anyhow::Error::from(sdp_client::Error::SpaDispatchFailed("boom".to_string()));
        assert_eq!(exit_code(&spa), EXIT_UNEXPECTED);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "sdp-client",
            "-s",
            "10.0.0.1:8443",
            "--ca-cert",
            "ca.crt",
            "--openspa-path",
            "/opt/openspa",
            "access",
            "-a",
        ]);
        let mut config = ClientConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.server.as_deref(), Some("10.0.0.1:8443"));
        assert_eq!(config.tls.ca_cert, Some(PathBuf::from("ca.crt")));
        assert_eq!(config.tls.certificate, PathBuf::from("client.crt"));
        assert_eq!(config.openspa.path, PathBuf::from("/opt/openspa"));
        assert!(matches!(cli.command, Command::Access { name: None, all: true }));
    }

    #[tokio::test]
    async fn test_resolve_controller() {
        let addr = resolve_controller("127.0.0.1:8443").await.unwrap();
        assert_eq!(addr.port(), 8443);

        let err = resolve_controller("127.0.0.1").await.unwrap_err();
        assert_eq!(exit_code(&err), EXIT_BAD_INPUT);
    }

    #[tokio::test]
    async fn test_session_panic_is_reported() {
        assert!(join_session(tokio::spawn(async {})).await);

        let handle = tokio::spawn(async { panic!("session failed") });
        assert!(!join_session(handle).await);
    }
}
