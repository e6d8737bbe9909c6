//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Tagged variants sent to one actor's queue via mpsc, each
//!    carrying its payload and an optional oneshot reply channel
//! 2. **Events**: [`ContainerUpdate`] notifications broadcast to any subscriber
//! 3. **Queries**: [`Query`] is the request type of the presentation boundary
//!    and travels unchanged from the gateway to the registry

use tokio::sync::oneshot;

use crate::{
    ContainerId, ContainerSnapshot, ProjectAggregate, ProjectId,
    runtime::{ContainerSummary, EventAction, RuntimeEvent},
    usage::UsageSample,
};

/// Commands processed by a ContainerActor, strictly in submission order
#[derive(Debug)]
pub enum ContainerCommand {
    /// Apply a new raw stat sample
    UpdateMetrics { sample: Box<UsageSample> },

    /// Derive the running flag from a lifecycle event
    SetRunning { action: EventAction },

    /// Copy of the current identity and state
    Snapshot {
        respond_to: oneshot::Sender<ContainerSnapshot>,
    },

    /// Cancel the stat stream, drain the queue and stop
    Retire,
}

/// Commands processed by the registry, the only writer of the container map
#[derive(Debug)]
pub enum RegistryCommand {
    /// Reconcile an inventory listing with the tracked containers
    ///
    /// With `listed_at`, the listing is complete: containers tracked before
    /// that generation but missing from it are retired.
    Discover {
        containers: Vec<ContainerSummary>,
        listed_at: Option<u64>,
        respond_to: oneshot::Sender<DiscoverySummary>,
    },

    /// Generation the next tracked container will get
    Generation { respond_to: oneshot::Sender<u64> },

    /// Apply a lifecycle event
    HandleEvent { event: RuntimeEvent },

    /// A stat stream broke, the container is considered gone
    StatStreamFailed { container_id: ContainerId },

    /// Answer a consumer query
    Query(Query),
}

/// Outcome of one inventory reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    /// Actors created by this pass
    pub created: usize,

    /// Containers that were already tracked (e.g. created by an earlier event)
    pub already_tracked: usize,

    /// Containers without the compose project label
    pub ignored: usize,

    /// Tracked containers retired because the runtime no longer lists them
    pub removed: usize,
}

/// Typed queries from the presentation layer
#[derive(Debug)]
pub enum Query {
    /// One aggregate per project
    ProjectList {
        respond_to: oneshot::Sender<Vec<ProjectAggregate>>,
    },

    /// Snapshots of one project's containers, empty for unknown projects
    ProjectDetail {
        project_id: ProjectId,
        respond_to: oneshot::Sender<Vec<ContainerSnapshot>>,
    },

    /// Snapshot of a single container, `None` if it is not tracked
    ContainerDetail {
        container_id: ContainerId,
        respond_to: oneshot::Sender<Option<ContainerSnapshot>>,
    },
}

/// Event published by a ContainerActor whenever its state changes
///
/// Delivered through a broadcast channel. Slow subscribers lag and lose
/// messages, which is acceptable as every update carries the full snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerUpdate {
    Changed(ContainerSnapshot),
    Removed(ContainerId),
}
