//! Docker Engine implementation of [`ContainerRuntime`]
//!
//! Connects through the local socket (or `DOCKER_HOST`) with `bollard`. Stat
//! samples are re-encoded into [`UsageSample`] so a partial document from the
//! engine degrades to zero values instead of failing the stream.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    models::{ContainerSummary as DockerContainer, EventMessage},
    query_parameters::{EventsOptions, ListContainersOptions, StatsOptions},
};
use futures::{StreamExt, stream::BoxStream};
use tracing::{debug, instrument, trace};

use crate::{ContainerId, usage::UsageSample};

use super::{
    ContainerRuntime, ContainerSummary, EventAction, RuntimeError, RuntimeEvent, RuntimeResult,
};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect with the local defaults and make sure the engine answers
    #[instrument]
    pub async fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        let version = docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        debug!("docker engine answered ping: {version}");

        Ok(Self { docker })
    }
}

fn summary_from_docker(container: DockerContainer) -> ContainerSummary {
    ContainerSummary {
        id: ContainerId::new(container.id.unwrap_or_default()),
        names: container.names.unwrap_or_default(),
        labels: container.labels.unwrap_or_default(),
        state: container
            .state
            .map(|state| state.to_string())
            .unwrap_or_default(),
    }
}

fn event_from_docker(message: EventMessage) -> Option<RuntimeEvent> {
    let actor = message.actor?;

    Some(RuntimeEvent {
        action: EventAction::parse(message.action.as_deref().unwrap_or_default()),
        actor_id: ContainerId::new(actor.id?),
        attributes: actor.attributes.unwrap_or_default(),
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, include_stopped: bool) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions {
            all: include_stopped,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?;

        trace!("docker listed {} containers", containers.len());

        Ok(containers.into_iter().map(summary_from_docker).collect())
    }

    fn stream_events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>> {
        let filters = HashMap::from([("type".to_string(), vec!["container".to_string()])]);
        let options = EventsOptions {
            filters: Some(filters),
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(message) => event_from_docker(message).map(Ok),
                    Err(e) => Some(Err(RuntimeError::Stream(e.to_string()))),
                }
            })
            .boxed()
    }

    fn stream_stats(&self, id: &ContainerId) -> BoxStream<'static, RuntimeResult<UsageSample>> {
        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };

        self.docker
            .stats(id.as_str(), Some(options))
            .map(|item| match item {
                Ok(stats) => serde_json::to_value(stats)
                    .and_then(serde_json::from_value::<UsageSample>)
                    .map_err(RuntimeError::from),
                Err(e) => Err(RuntimeError::Stream(e.to_string())),
            })
            .boxed()
    }
}
