//! Wiring of the registry, the event stream and the query gateway

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    actors::{
        events::EventStreamActor,
        messages::{ContainerUpdate, DiscoverySummary},
        registry::RegistryHandle,
    },
    config::Config,
    gateway::QueryClient,
    runtime::ContainerRuntime,
};

/// Running monitor
///
/// Every task started here is bound to the root token passed to
/// [`Monitor::start`]; cancelling it unwinds all of them.
pub struct Monitor {
    registry: RegistryHandle,
    client: QueryClient,
    cancel: CancellationToken,
}

impl Monitor {
    /// Start the registry, the event stream and the query gateway.
    ///
    /// The event stream starts before any discovery, events racing with the
    /// inventory scan are reconciled by the registry.
    pub fn start(
        runtime: Arc<dyn ContainerRuntime>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        let registry = RegistryHandle::spawn(runtime.clone(), config, cancel.clone());

        EventStreamActor::new(runtime, registry.clone(), cancel.clone()).spawn();

        let client = QueryClient::spawn(
            registry.clone(),
            config.registry_queue_capacity,
            cancel.clone(),
        );

        Self {
            registry,
            client,
            cancel,
        }
    }

    /// Initial inventory scan
    pub async fn discover(&self) -> Result<DiscoverySummary> {
        let summary = self.registry.discover().await?;
        info!(
            "tracking {} compose containers ({} ignored, {} retired)",
            summary.created + summary.already_tracked,
            summary.ignored,
            summary.removed
        );

        Ok(summary)
    }

    pub fn client(&self) -> QueryClient {
        self.client.clone()
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContainerUpdate> {
        self.registry.subscribe()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
