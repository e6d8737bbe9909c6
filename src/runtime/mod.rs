//! Boundary to the container runtime
//!
//! The monitor only needs three capabilities from the runtime: a one-shot
//! inventory listing, the lifecycle event stream and one stats stream per
//! container. [`ContainerRuntime`] captures them so the actors can run against
//! docker ([`docker::DockerRuntime`]) or an in-memory fake in tests.

pub mod docker;
pub mod error;

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{ContainerId, usage::UsageSample};

pub use error::{RuntimeError, RuntimeResult};

/// Container as returned by the inventory listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Runtime state, e.g. `running` or `exited`
    pub state: String,
}

impl ContainerSummary {
    pub fn name(&self) -> &str {
        self.names.first().map_or("", String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Lifecycle event of a single container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub action: EventAction,
    pub actor_id: ContainerId,
    /// Event attributes, docker includes the container labels and its `name`
    pub attributes: HashMap<String, String>,
}

impl RuntimeEvent {
    pub fn new(action: &str, actor_id: impl Into<String>) -> Self {
        Self {
            action: EventAction::parse(action),
            actor_id: ContainerId::new(actor_id),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn name(&self) -> &str {
        self.attributes.get("name").map_or("", String::as_str)
    }
}

/// Container-level lifecycle actions
///
/// Exec sessions, health checks and other sub-events are kept as
/// [`EventAction::Other`] and never change the running flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Start,
    Unpause,
    Restart,
    Reload,
    Die,
    Stop,
    Pause,
    Kill,
    Destroy,
    Other(String),
}

impl EventAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "create" => EventAction::Create,
            "start" => EventAction::Start,
            "unpause" => EventAction::Unpause,
            "restart" => EventAction::Restart,
            "reload" => EventAction::Reload,
            "die" => EventAction::Die,
            "stop" => EventAction::Stop,
            "pause" => EventAction::Pause,
            "kill" => EventAction::Kill,
            "destroy" => EventAction::Destroy,
            other => EventAction::Other(other.to_string()),
        }
    }

    /// Running flag implied by this action, `None` if it says nothing about it
    pub fn running_state(&self) -> Option<bool> {
        match self {
            EventAction::Create
            | EventAction::Start
            | EventAction::Unpause
            | EventAction::Restart
            | EventAction::Reload => Some(true),
            EventAction::Die
            | EventAction::Stop
            | EventAction::Pause
            | EventAction::Kill
            | EventAction::Destroy => Some(false),
            EventAction::Other(_) => None,
        }
    }

    pub fn is_destroy(&self) -> bool {
        matches!(self, EventAction::Destroy)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventAction::Create => "create",
            EventAction::Start => "start",
            EventAction::Unpause => "unpause",
            EventAction::Restart => "restart",
            EventAction::Reload => "reload",
            EventAction::Die => "die",
            EventAction::Stop => "stop",
            EventAction::Pause => "pause",
            EventAction::Kill => "kill",
            EventAction::Destroy => "destroy",
            EventAction::Other(action) => action,
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities consumed from the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// List containers, optionally including stopped ones
    async fn list_containers(&self, include_stopped: bool) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Long-lived stream of container lifecycle events
    fn stream_events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>>;

    /// Long-lived stream of stat samples for one container.
    ///
    /// Ends when the container goes away; a transport failure is reported as
    /// an error item.
    fn stream_stats(&self, id: &ContainerId) -> BoxStream<'static, RuntimeResult<UsageSample>>;
}
