//! RegistryActor - Owns the set of live container actors
//!
//! Every structural change of the container map (insert, remove, lookup) is a
//! [`RegistryCommand`] processed by this single task, so the inventory scan,
//! the event stream and failing stat streams can race freely without locks.
//!
//! ## Reconciliation
//!
//! The inventory scan and the event stream are two independent sources of
//! truth. Both go through [`RegistryActor::track`], which checks the map before
//! inserting, so whichever arrives second is a no-op. A container that is
//! listed but destroyed before its listing is applied gets tracked briefly;
//! its stat stream then fails and the container is retired again.
//!
//! Every tracked container is stamped with the registry generation at insert.
//! A complete listing carries the generation read before it was taken, and
//! only containers tracked before that point are retired when the listing no
//! longer contains them. Containers created by events racing the listing stay.
//!
//! ## Queries
//!
//! Queries never read actor state directly. The registry selects the relevant
//! handles and a short-lived task collects their snapshots in parallel, so the
//! registry keeps processing commands while actors answer.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    ContainerId, ContainerIdentity, ContainerSnapshot, ProjectAggregate,
    config::{Config, LabelConfig},
    runtime::{ContainerRuntime, ContainerSummary, RuntimeEvent},
};

use super::{
    container::ContainerHandle,
    messages::{ContainerUpdate, DiscoverySummary, Query, RegistryCommand},
    stats::spawn_stat_stream,
};

/// Container actor plus the generation it was tracked at
struct Tracked {
    handle: ContainerHandle,
    generation: u64,
}

pub struct RegistryActor {
    /// Live container actors, keyed by container ID
    containers: HashMap<ContainerId, Tracked>,

    /// Generation of the next tracked container
    generation: u64,

    runtime: Arc<dyn ContainerRuntime>,

    labels: LabelConfig,

    command_rx: mpsc::Receiver<RegistryCommand>,

    /// Handed to stat streams for failure reports
    registry_tx: mpsc::WeakSender<RegistryCommand>,

    /// Shared by all container actors for publishing their changes
    update_tx: broadcast::Sender<ContainerUpdate>,

    /// Root token, parent of every container token
    cancel: CancellationToken,
}

impl RegistryActor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        labels: LabelConfig,
        command_rx: mpsc::Receiver<RegistryCommand>,
        registry_tx: mpsc::WeakSender<RegistryCommand>,
        update_tx: broadcast::Sender<ContainerUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            containers: HashMap::with_capacity(256),
            generation: 0,
            runtime,
            labels,
            command_rx,
            registry_tx,
            update_tx,
            cancel,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until the root token is cancelled or every handle is dropped.
    /// Remaining container actors are retired on exit.
    #[instrument(skip(self), name = "registry")]
    pub async fn run(mut self) {
        debug!("starting registry actor");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancelled, shutting down");
                    break;
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                }
            }
        }

        for (_, tracked) in self.containers.drain() {
            tracked.handle.retire();
        }

        debug!("registry actor stopped");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Discover {
                containers,
                listed_at,
                respond_to,
            } => {
                let summary = self.discover(containers, listed_at);
                let _ = respond_to.send(summary);
            }

            RegistryCommand::Generation { respond_to } => {
                let _ = respond_to.send(self.generation);
            }

            RegistryCommand::HandleEvent { event } => self.handle_event(event),

            RegistryCommand::StatStreamFailed { container_id } => {
                if self.remove(&container_id) {
                    info!("retired {container_id} after stat stream failure");
                }
            }

            RegistryCommand::Query(query) => self.answer(query),
        }
    }

    fn discover(
        &mut self,
        containers: Vec<ContainerSummary>,
        listed_at: Option<u64>,
    ) -> DiscoverySummary {
        let mut summary = DiscoverySummary::default();

        if let Some(listed_at) = listed_at {
            summary.removed = self.prune(&containers, listed_at);
        }

        for container in containers {
            let Some(identity) = ContainerIdentity::from_labels(
                container.id.clone(),
                container.name(),
                &container.labels,
                &self.labels,
            ) else {
                summary.ignored += 1;
                continue;
            };

            if self.track(identity, container.is_running()) {
                summary.created += 1;
            } else {
                summary.already_tracked += 1;
            }
        }

        debug!(
            "discovery created {} containers ({} already tracked, {} ignored, {} removed)",
            summary.created, summary.already_tracked, summary.ignored, summary.removed
        );

        summary
    }

    /// Retire containers tracked before `listed_at` that `listing` lacks
    fn prune(&mut self, listing: &[ContainerSummary], listed_at: u64) -> usize {
        let listed: HashSet<&ContainerId> = listing.iter().map(|c| &c.id).collect();

        let stale: Vec<ContainerId> = self
            .containers
            .iter()
            .filter(|(id, tracked)| tracked.generation < listed_at && !listed.contains(id))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            if self.remove(id) {
                info!("retired {id}, no longer listed by the runtime");
            }
        }

        stale.len()
    }

    fn handle_event(&mut self, event: RuntimeEvent) {
        let id = &event.actor_id;

        if let Some(tracked) = self.containers.get(id) {
            let destroyed = event.action.is_destroy();

            if tracked.handle.set_running(event.action.clone()).is_err() {
                trace!("container {id} already retired");
            }

            if destroyed && self.remove(id) {
                debug!("retired destroyed container {id}");
            }
            return;
        }

        // sub-events (exec, health checks) leave the running flag unknown, the
        // scan or the next container-level event tracks such a container
        let Some(running) = event.action.running_state() else {
            trace!("{} event for untracked container {id}", event.action);
            return;
        };

        if event.action.is_destroy() {
            trace!("destroy event for untracked container {id}");
            return;
        }

        let Some(identity) =
            ContainerIdentity::from_labels(id.clone(), event.name(), &event.attributes, &self.labels)
        else {
            trace!("ignoring {} event for {id} without compose labels", event.action);
            return;
        };

        if self.track(identity, running) {
            debug!("tracking {id} after {} event", event.action);
        }
    }

    /// Insert a new container actor and start its stat stream.
    ///
    /// Returns `false` if the container is already tracked.
    fn track(&mut self, identity: ContainerIdentity, running: bool) -> bool {
        if self.containers.contains_key(&identity.id) {
            return false;
        }

        let container =
            ContainerHandle::spawn(identity, running, self.update_tx.clone(), &self.cancel);

        spawn_stat_stream(
            self.runtime.clone(),
            container.clone(),
            self.registry_tx.clone(),
        );

        self.containers.insert(
            container.id().clone(),
            Tracked {
                handle: container,
                generation: self.generation,
            },
        );
        self.generation += 1;
        true
    }

    fn remove(&mut self, id: &ContainerId) -> bool {
        match self.containers.remove(id) {
            Some(tracked) => {
                tracked.handle.retire();
                true
            }
            None => false,
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::ProjectList { respond_to } => {
                let containers: Vec<_> = self
                    .containers
                    .values()
                    .map(|tracked| tracked.handle.clone())
                    .collect();

                tokio::spawn(async move {
                    let snapshots = collect_snapshots(containers).await;
                    let _ = respond_to.send(aggregate_projects(&snapshots));
                });
            }

            Query::ProjectDetail {
                project_id,
                respond_to,
            } => {
                let containers: Vec<_> = self
                    .containers
                    .values()
                    .map(|tracked| &tracked.handle)
                    .filter(|container| container.identity().project.id == project_id)
                    .cloned()
                    .collect();

                tokio::spawn(async move {
                    let mut snapshots = collect_snapshots(containers).await;
                    snapshots.sort_by(|a, b| {
                        a.identity
                            .name
                            .cmp(&b.identity.name)
                            .then_with(|| a.identity.id.cmp(&b.identity.id))
                    });
                    let _ = respond_to.send(snapshots);
                });
            }

            Query::ContainerDetail {
                container_id,
                respond_to,
            } => {
                let Some(container) = self
                    .containers
                    .get(&container_id)
                    .map(|tracked| tracked.handle.clone())
                else {
                    let _ = respond_to.send(None);
                    return;
                };

                tokio::spawn(async move {
                    let _ = respond_to.send(container.snapshot().await);
                });
            }
        }
    }
}

/// Snapshot every container, skipping those retired in the meantime
async fn collect_snapshots(containers: Vec<ContainerHandle>) -> Vec<ContainerSnapshot> {
    join_all(containers.iter().map(|container| container.snapshot()))
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Group snapshots by project and sum their usage.
///
/// Each snapshot contributes to exactly one aggregate. Members may disagree on
/// the project name (label versus directory fallback), the smallest one wins.
/// The result is sorted by project name, then ID.
pub fn aggregate_projects(snapshots: &[ContainerSnapshot]) -> Vec<ProjectAggregate> {
    let mut projects: HashMap<_, ProjectAggregate> = HashMap::new();

    for snapshot in snapshots {
        let project = &snapshot.identity.project;
        let aggregate = projects
            .entry(&project.id)
            .or_insert_with(|| ProjectAggregate {
                id: project.id.clone(),
                name: project.name.clone(),
                cpu_percentage: 0.0,
                memory_percentage: 0.0,
                containers_running: 0,
                containers_total: 0,
            });

        if project.name < aggregate.name {
            aggregate.name.clone_from(&project.name);
        }

        aggregate.cpu_percentage += snapshot.state.cpu_percentage;
        aggregate.memory_percentage += snapshot.state.memory_percentage;
        aggregate.containers_total += 1;
        if snapshot.state.running {
            aggregate.containers_running += 1;
        }
    }

    let mut projects: Vec<_> = projects.into_values().collect();
    projects.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    projects
}

/// Handle for the RegistryActor
///
/// This handle provides a typed API for sending commands to the registry.
/// It can be cloned and shared across tasks.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,

    /// Used by [`RegistryHandle::discover`] to list containers outside the registry task
    runtime: Arc<dyn ContainerRuntime>,

    include_stopped: bool,

    update_tx: broadcast::Sender<ContainerUpdate>,
}

impl RegistryHandle {
    /// Spawn a new registry actor
    ///
    /// The registry and every container actor it creates stop when `cancel` fires.
    pub fn spawn(
        runtime: Arc<dyn ContainerRuntime>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.registry_queue_capacity.max(1));
        let (update_tx, _) = broadcast::channel(config.update_channel_capacity.max(1));

        let actor = RegistryActor::new(
            runtime.clone(),
            config.labels.clone(),
            cmd_rx,
            cmd_tx.downgrade(),
            update_tx.clone(),
            cancel,
        );

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            runtime,
            include_stopped: config.include_stopped,
            update_tx,
        }
    }

    /// List the runtime's containers and track every compose container not yet known.
    ///
    /// A listing that includes stopped containers is complete, tracked
    /// containers missing from it are retired.
    pub async fn discover(&self) -> Result<DiscoverySummary> {
        let listed_at = match self.include_stopped {
            true => Some(self.generation().await?),
            false => None,
        };

        let containers = self
            .runtime
            .list_containers(self.include_stopped)
            .await
            .context("failed to list containers")?;

        self.reconcile(containers, listed_at).await
    }

    /// Apply an already fetched listing.
    ///
    /// `listed_at` is the [`RegistryHandle::generation`] read before listing;
    /// pass it only for complete listings.
    pub async fn reconcile(
        &self,
        containers: Vec<ContainerSummary>,
        listed_at: Option<u64>,
    ) -> Result<DiscoverySummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::Discover {
                containers,
                listed_at,
                respond_to: tx,
            })
            .await
            .context("failed to send Discover command")?;

        rx.await.context("failed to receive discovery summary")
    }

    /// Generation the next tracked container will get
    pub async fn generation(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::Generation { respond_to: tx })
            .await
            .context("failed to send Generation command")?;

        rx.await.context("failed to receive generation")
    }

    pub async fn handle_event(&self, event: RuntimeEvent) -> Result<()> {
        self.sender
            .send(RegistryCommand::HandleEvent { event })
            .await
            .context("failed to send HandleEvent command")
    }

    pub async fn stat_stream_failed(&self, container_id: ContainerId) -> Result<()> {
        self.sender
            .send(RegistryCommand::StatStreamFailed { container_id })
            .await
            .context("failed to send StatStreamFailed command")
    }

    /// Submit a query, the answer arrives on the query's own reply channel
    pub async fn query(&self, query: Query) -> Result<()> {
        self.sender
            .send(RegistryCommand::Query(query))
            .await
            .context("failed to send Query command")
    }

    /// Receive every container change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerUpdate> {
        self.update_tx.subscribe()
    }
}
