//! Single-packet authorization gateway.
//!
//! The SPA exchange itself lives in an external agent. This module only
//! validates the request, hands it to the agent and reports whether the
//! dispatch succeeded.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use async_trait::async_trait;
use shared::types::{ProtoPort, Protocol};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use crate::config::OpenSpaConfig;
use crate::error::{Error, Result};

/// Authorize `protocol` traffic to `target` on `start_port..=end_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockRequest {
    pub target: IpAddr,
    pub protocol: Protocol,
    pub start_port: u16,
    pub end_port: u16,
    /// Ask the agent to keep re-authorizing on its own schedule
    pub continuous: bool,
}

impl UnlockRequest {
    pub fn single(target: IpAddr, port: ProtoPort, continuous: bool) -> Self {
        Self {
            target,
            protocol: port.protocol,
            start_port: port.port,
            end_port: port.port,
            continuous,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.end_port < self.start_port {
            return Err(Error::InvalidRequest(format!(
                "end port {} before start port {}",
                self.end_port, self.start_port
            )));
        }
        if self.protocol.has_ports() && self.start_port == 0 {
            return Err(Error::InvalidRequest(format!(
                "{} requires a non-zero port",
                self.protocol
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait SpaGateway: Send + Sync + 'static {
    /// Returns once the request has been dispatched. Acceptance by the
    /// remote firewall is not confirmed.
    async fn unlock(&self, request: &UnlockRequest) -> Result<()>;
}

/// Drives the `openspa` command line agent.
///
/// Continuous requests leave a long-running child behind; those are
/// supervised here and killed once `cancel` fires.
pub struct OpenSpaGateway {
    path: PathBuf,
    ospa: PathBuf,
    server_port: u16,
    cancel: CancellationToken,
    children: TaskTracker,
}

impl OpenSpaGateway {
    pub fn new(config: &OpenSpaConfig, cancel: CancellationToken) -> Self {
        Self {
            path: config.path.clone(),
            ospa: config.ospa.clone(),
            server_port: config.server_port,
            cancel,
            children: TaskTracker::new(),
        }
    }

    fn args(&self, request: &UnlockRequest) -> Vec<String> {
        let mut args = vec![
            "request".to_string(),
            self.ospa.display().to_string(),
            "--protocol".to_string(),
            request.protocol.to_string(),
            "-p".to_string(),
            request.start_port.to_string(),
            "--end-port".to_string(),
            request.end_port.to_string(),
            "--server-ip".to_string(),
            request.target.to_string(),
            "--server-port".to_string(),
            self.server_port.to_string(),
        ];
        if request.continuous {
            args.push("-a".to_string());
        }
        args
    }

    /// Wait for supervised children to exit. Call after cancelling.
    pub async fn shutdown(&self) {
        self.children.close();
        self.children.wait().await;
    }
}

#[async_trait]
impl SpaGateway for OpenSpaGateway {
    async fn unlock(&self, request: &UnlockRequest) -> Result<()> {
        request.validate()?;

        let args = self.args(request);
        tracing::debug!(
            command = %format!("{} {}", self.path.display(), args.join(" ")),
            "OpenSPA command"
        );

        let mut command = Command::new(&self.path);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);

        if !request.continuous {
            let status = command.status().await.map_err(|e| {
                Error::SpaDispatchFailed(format!("failed to run {}: {}", self.path.display(), e))
            })?;
            if !status.success() {
                return Err(Error::SpaDispatchFailed(format!(
                    "{} exited with {}",
                    self.path.display(),
                    status
                )));
            }
            return Ok(());
        }

        let mut child = command.spawn().map_err(|e| {
            Error::SpaDispatchFailed(format!("failed to start {}: {}", self.path.display(), e))
        })?;

        let cancel = self.cancel.clone();
        let target = request.target;
        let port = request.start_port;
        self.children.spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => tracing::warn!(%target, port, "OpenSPA agent exited with {}", status),
                    Err(e) => tracing::error!(%target, port, "Failed to wait on OpenSPA agent: {}", e),
                },
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(%target, port, "Failed to stop OpenSPA agent: {}", e);
                    }
                }
            }
        });

        Ok(())
    }
}
