//! Access orchestration: unlock the controller, discover, then hold every
//! authorized service port open with one independent task each.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use shared::types::{AccessType, ProtoPort, Service};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use crate::discover::{Discovery, DiscoveryTransport};
use crate::error::{Error, Result};
use crate::spa::{SpaGateway, UnlockRequest};

/// Mechanism used to open a service. One case per supported [`AccessType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMethod {
    Spa,
}

impl AccessMethod {
    /// First access type of the service this client knows how to use
    pub fn resolve(service: &Service) -> Result<Self> {
        service
            .access_types
            .iter()
            .find_map(|at| match at {
                AccessType::OpenSpa => Some(AccessMethod::Spa),
            })
            .ok_or_else(|| Error::UnsupportedAccessType {
                service: service.name.clone(),
            })
    }
}

/// Which discovered services to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Named(String),
}

impl Selection {
    pub fn apply(&self, services: Vec<Service>) -> Result<Vec<Service>> {
        match self {
            Selection::All => Ok(services),
            Selection::Named(name) => services
                .into_iter()
                .find(|s| &s.name == name)
                .map(|s| vec![s])
                .ok_or_else(|| Error::UnknownService(name.clone())),
        }
    }
}

/// `Starting -> Unlocking -> Maintaining`, or `Unlocking -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Starting,
    Unlocking,
    Maintaining,
    Failed,
}

impl AccessState {
    pub fn is_settled(&self) -> bool {
        matches!(self, AccessState::Maintaining | AccessState::Failed)
    }

    pub fn can_advance_to(&self, next: AccessState) -> bool {
        matches!(
            (self, next),
            (AccessState::Starting, AccessState::Unlocking)
                | (AccessState::Unlocking, AccessState::Maintaining)
                | (AccessState::Unlocking, AccessState::Failed)
        )
    }
}

/// Reported once by a task whose unlock failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessFailure {
    pub service: String,
    pub address: Option<IpAddr>,
    pub port: ProtoPort,
    pub error: String,
}

/// One service port being held open
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub service: String,
    pub port: ProtoPort,
    state: watch::Receiver<AccessState>,
}

impl AccessGrant {
    pub fn state(&self) -> AccessState {
        *self.state.borrow()
    }

    /// Resolves once the task reached `Maintaining` or `Failed`
    pub async fn settled(&self) -> AccessState {
        let mut rx = self.state.clone();
        let settled = rx.wait_for(AccessState::is_settled).await.map(|state| *state);
        match settled {
            Ok(state) => state,
            // Task went away before settling; only happens on shutdown
            Err(_) => *rx.borrow(),
        }
    }
}

pub struct AccessOrchestrator<G> {
    gateway: Arc<G>,
    controller: SocketAddr,
    stagger: Duration,
    cancel: CancellationToken,
}

impl<G: SpaGateway> AccessOrchestrator<G> {
    pub fn new(
        gateway: Arc<G>,
        controller: SocketAddr,
        stagger: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            controller,
            stagger,
            cancel,
        }
    }

    /// Open the controller's own TCP port with a single, non-continuous unlock.
    pub async fn unlock_controller(&self) -> Result<()> {
        let request = UnlockRequest::single(
            self.controller.ip(),
            ProtoPort::tcp(self.controller.port()),
            false,
        );
        tracing::debug!(controller = %self.controller, "Unlocking controller");
        self.gateway.unlock(&request).await
    }

    /// Controller unlock followed by discovery. Discovery is never issued
    /// if the unlock fails.
    pub async fn discover<T>(&self, transport: &T) -> Result<Discovery>
    where
        T: DiscoveryTransport + ?Sized,
    {
        self.unlock_controller().await?;
        transport.discover().await
    }

    /// Bootstrap and launch access tasks for the selected services.
    ///
    /// A failed or partial discovery starts nothing.
    pub async fn start<T>(&self, transport: &T, selection: &Selection) -> Result<AccessSession>
    where
        T: DiscoveryTransport + ?Sized,
    {
        let discovery = self.discover(transport).await?;
        let services = selection.apply(discovery.services)?;
        tracing::info!(
            device_id = %discovery.device_id,
            count = services.len(),
            "Gaining access to authorized services"
        );
        Ok(self.launch(services).await)
    }

    /// Start one task per service port, staggered. Returns as soon as every
    /// task has been spawned; a task stuck in its unlock delays nothing.
    pub async fn launch(&self, services: Vec<Service>) -> AccessSession {
        let (failure_tx, failure_rx) = flume::unbounded();
        let tracker = TaskTracker::new();
        let cancel = self.cancel.child_token();
        let mut grants = Vec::new();

        for service in services {
            let service = Arc::new(service);
            for &port in &service.ports {
                let (state_tx, state_rx) = watch::channel(AccessState::Starting);
                grants.push(AccessGrant {
                    service: service.name.clone(),
                    port,
                    state: state_rx,
                });

                tracker.spawn(maintain(
                    Arc::clone(&self.gateway),
                    Arc::clone(&service),
                    port,
                    state_tx,
                    failure_tx.clone(),
                    cancel.clone(),
                ));

                if !self.stagger.is_zero() {
                    tokio::time::sleep(self.stagger).await;
                }
            }
        }
        tracker.close();

        AccessSession {
            grants,
            failures: failure_rx,
            tracker,
            cancel,
        }
    }
}

async fn maintain<G: SpaGateway>(
    gateway: Arc<G>,
    service: Arc<Service>,
    port: ProtoPort,
    state: watch::Sender<AccessState>,
    failures: flume::Sender<AccessFailure>,
    cancel: CancellationToken,
) {
    let address = service.primary_address();
    advance(&state, AccessState::Unlocking);
    let unlock = async {
        let AccessMethod::Spa = AccessMethod::resolve(&service)?;
        let target = address.ok_or_else(|| {
            Error::InvalidRequest(format!("service {} has no address", service.name))
        })?;

        gateway.unlock(&UnlockRequest::single(target, port, true)).await
    };

    let result = tokio::select! {
        result = unlock => result,
        _ = cancel.cancelled() => return,
    };

    match result {
        Ok(()) => {
            tracing::info!(service = %service.name, %port, "Access granted");
            advance(&state, AccessState::Maintaining);
            // Re-authorization is delegated; hold the grant until shutdown
            cancel.cancelled().await;
        }
        Err(e) => {
            // Unbounded: never blocks the task
            let _ = failures.send(AccessFailure {
                service: service.name.clone(),
                address,
                port,
                error: e.to_string(),
            });
            advance(&state, AccessState::Failed);
        }
    }
}

fn advance(state: &watch::Sender<AccessState>, next: AccessState) {
    let previous = *state.borrow();
    debug_assert!(
        previous.can_advance_to(next),
        "invalid access state transition {:?} -> {:?}",
        previous,
        next
    );
    state.send_replace(next);
}

/// The set of running access tasks.
pub struct AccessSession {
    grants: Vec<AccessGrant>,
    failures: flume::Receiver<AccessFailure>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl AccessSession {
    pub fn grants(&self) -> &[AccessGrant] {
        &self.grants
    }

    pub fn failures(&self) -> &flume::Receiver<AccessFailure> {
        &self.failures
    }

    /// Settled state of every grant, in launch order
    pub async fn wait_settled(&self) -> Vec<AccessState> {
        join_all(self.grants.iter().map(|grant| grant.settled())).await
    }

    /// Report failures as they arrive until cancelled, then stop every task.
    ///
    /// Never returns on its own because some or all tasks failed.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                failure = self.failures.recv_async() => match failure {
                    Ok(failure) => tracing::error!(
                        service = %failure.service,
                        port = %failure.port,
                        "Failed to access service: {}",
                        failure.error
                    ),
                    // Every task has exited; keep holding until shutdown
                    Err(_) => {
                        self.cancel.cancelled().await;
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.wait().await;
        tracing::debug!(grants = self.grants.len(), "Access tasks stopped");
    }
}
