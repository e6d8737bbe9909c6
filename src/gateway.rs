//! QueryGateway - Request/response boundary for the presentation layer
//!
//! The presentation layer submits [`Query`] values on an mpsc channel, each
//! carrying a oneshot reply channel typed to the expected result. The gateway
//! holds no state and forwards every query to the registry unchanged.
//!
//! Unknown project or container IDs produce empty results, not errors.

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{
    ContainerId, ContainerSnapshot, ProjectAggregate, ProjectId,
    actors::{messages::Query, registry::RegistryHandle},
};

pub struct QueryGateway {
    requests: mpsc::Receiver<Query>,

    registry: RegistryHandle,

    cancel: CancellationToken,
}

impl QueryGateway {
    pub fn new(
        requests: mpsc::Receiver<Query>,
        registry: RegistryHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            requests,
            registry,
            cancel,
        }
    }

    /// Run until the token is cancelled, every client is dropped or the
    /// registry stops
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(mut self) {
        debug!("starting query gateway");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                query = self.requests.recv() => {
                    let Some(query) = query else {
                        debug!("all query clients dropped");
                        break;
                    };

                    trace!("forwarding {query:?}");
                    if self.registry.query(query).await.is_err() {
                        warn!("registry stopped, closing gateway");
                        break;
                    }
                }
            }
        }

        debug!("query gateway stopped");
    }
}

/// Client side of the gateway
///
/// Cloneable. [`QueryClient::sender`] exposes the raw query channel for
/// consumers that manage their own reply channels.
#[derive(Debug, Clone)]
pub struct QueryClient {
    sender: mpsc::Sender<Query>,
}

impl QueryClient {
    /// Spawn a gateway in front of `registry` and return its client
    pub fn spawn(registry: RegistryHandle, capacity: usize, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        tokio::spawn(QueryGateway::new(rx, registry, cancel).run());

        Self { sender: tx }
    }

    pub fn sender(&self) -> mpsc::Sender<Query> {
        self.sender.clone()
    }

    /// One aggregate per tracked project
    pub async fn project_list(&self) -> Result<Vec<ProjectAggregate>> {
        let (tx, rx) = oneshot::channel();
        self.send(Query::ProjectList { respond_to: tx }).await?;

        rx.await.context("failed to receive project list")
    }

    /// Snapshots of one project's containers
    pub async fn project_detail(&self, project_id: ProjectId) -> Result<Vec<ContainerSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.send(Query::ProjectDetail {
            project_id,
            respond_to: tx,
        })
        .await?;

        rx.await.context("failed to receive project detail")
    }

    pub async fn container_detail(
        &self,
        container_id: ContainerId,
    ) -> Result<Option<ContainerSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.send(Query::ContainerDetail {
            container_id,
            respond_to: tx,
        })
        .await?;

        rx.await.context("failed to receive container detail")
    }

    async fn send(&self, query: Query) -> Result<()> {
        self.sender
            .send(query)
            .await
            .context("query gateway is not running")
    }
}
