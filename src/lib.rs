//! Real-time resource monitor for docker compose projects.
//!
//! Containers are discovered through a [`runtime::ContainerRuntime`], grouped by
//! their compose project and tracked by one actor each. Consumers read
//! aggregated and per-container views through the [`gateway::QueryClient`].

pub mod actors;
pub mod config;
pub mod gateway;
pub mod monitor;
pub mod runtime;
pub mod usage;

use std::{collections::HashMap, fmt, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LabelConfig;

/// Runtime-assigned container ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Project ID, i.e. the compose working directory shared by its containers
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: ProjectId,
    pub name: String,
}

/// Immutable identity of a tracked container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub id: ContainerId,
    pub name: String,
    /// Compose service name (empty when the label is missing)
    pub service: String,
    pub project: ProjectRef,
}

impl ContainerIdentity {
    /// Build an identity from runtime labels.
    ///
    /// Returns `None` for containers without the compose project label, those
    /// are never tracked.
    pub fn from_labels(
        id: ContainerId,
        name: &str,
        labels: &HashMap<String, String>,
        keys: &LabelConfig,
    ) -> Option<Self> {
        let working_dir = labels.get(&keys.project)?;

        let project_name = labels
            .get(&keys.project_name)
            .filter(|name| !name.is_empty())
            .cloned()
            .or_else(|| {
                Path::new(working_dir)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| working_dir.clone());

        Some(Self {
            id,
            name: name.trim_start_matches('/').to_string(),
            service: labels.get(&keys.service).cloned().unwrap_or_default(),
            project: ProjectRef {
                id: ProjectId::new(working_dir.clone()),
                name: project_name,
            },
        })
    }
}

/// Mutable per-container state, only ever written by the owning actor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    /// CPU utilization, may exceed 100 on multi-core hosts
    pub cpu_percentage: f64,
    /// Memory utilization relative to the container limit
    pub memory_percentage: f64,
}

/// Immutable copy of an actor's identity and state at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub identity: ContainerIdentity,
    pub state: ContainerState,
    /// When the last stat sample was applied
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-project totals, derived from container snapshots at query time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAggregate {
    pub id: ProjectId,
    pub name: String,
    pub cpu_percentage: f64,
    pub memory_percentage: f64,
    pub containers_running: usize,
    pub containers_total: usize,
}
