//! ContainerActor - Owns the live state of one container
//!
//! The actor is the only writer of its running flag and usage percentages.
//! Everything else reads them through [`ContainerHandle::snapshot`].
//!
//! ## Lifecycle
//!
//! ```text
//! Active ──Retire──► Retired
//! ```
//!
//! Retiring cancels the per-container token (which stops the stat stream),
//! discards whatever is still queued and publishes [`ContainerUpdate::Removed`].
//! The actor also stops when the parent token is cancelled on shutdown.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::{
    ContainerId, ContainerIdentity, ContainerSnapshot, ContainerState,
    runtime::EventAction,
    usage::{self, CpuStats, UsageSample},
};

use super::messages::{ContainerCommand, ContainerUpdate};

pub struct ContainerActor {
    identity: Arc<ContainerIdentity>,

    state: ContainerState,

    /// Last CPU reading, used when a sample carries no previous reading
    last_cpu: Option<CpuStats>,

    /// When the last stat sample was applied
    updated_at: Option<DateTime<Utc>>,

    command_rx: mpsc::UnboundedReceiver<ContainerCommand>,

    /// Broadcast sender for publishing state changes
    update_tx: broadcast::Sender<ContainerUpdate>,

    /// Per-container token, shared with the stat stream
    cancel: CancellationToken,
}

impl ContainerActor {
    pub fn new(
        identity: Arc<ContainerIdentity>,
        running: bool,
        command_rx: mpsc::UnboundedReceiver<ContainerCommand>,
        update_tx: broadcast::Sender<ContainerUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity,
            state: ContainerState {
                running,
                ..Default::default()
            },
            last_cpu: None,
            updated_at: None,
            command_rx,
            update_tx,
            cancel,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until:
    /// - A Retire command is received
    /// - The cancellation token fires
    /// - Every handle is dropped
    #[instrument(skip(self), fields(container = %self.identity.name, project = %self.identity.project.name))]
    pub async fn run(mut self) {
        debug!("starting container actor");
        self.publish();

        loop {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };

                    if !self.handle_command(cmd) {
                        self.retire().await;
                        break;
                    }
                }

                _ = self.cancel.cancelled() => {
                    debug!("cancelled, shutting down");
                    break;
                }
            }
        }

        debug!("container actor stopped");
    }

    /// Returns `false` once the actor has to stop
    fn handle_command(&mut self, cmd: ContainerCommand) -> bool {
        match cmd {
            ContainerCommand::UpdateMetrics { sample } => {
                self.update_metrics(&sample);
                self.publish();
            }

            ContainerCommand::SetRunning { action } => match action.running_state() {
                Some(running) => {
                    trace!("{action} sets running to {running}");
                    self.state.running = running;
                    self.publish();
                }
                None => trace!("{action} does not affect running state"),
            },

            ContainerCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            ContainerCommand::Retire => {
                debug!("received Retire command");
                return false;
            }
        }

        true
    }

    fn update_metrics(&mut self, sample: &UsageSample) {
        let previous = match &self.last_cpu {
            Some(last) if sample.precpu_stats.is_empty() => last,
            _ => &sample.precpu_stats,
        };

        self.state.cpu_percentage = usage::cpu_percent(&sample.cpu_stats, previous);
        self.state.memory_percentage =
            usage::memory_percent(sample.memory_stats.limit as f64, &sample.memory_stats);

        self.last_cpu = Some(sample.cpu_stats.clone());
        self.updated_at = Some(Utc::now());

        trace!(
            "cpu {:.2}% memory {:.2}%",
            self.state.cpu_percentage, self.state.memory_percentage
        );
    }

    async fn retire(&mut self) {
        self.cancel.cancel();
        self.command_rx.close();

        let mut discarded = 0;
        while self.command_rx.recv().await.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("discarded {discarded} commands queued after Retire");
        }

        let _ = self
            .update_tx
            .send(ContainerUpdate::Removed(self.identity.id.clone()));
    }

    fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            identity: (*self.identity).clone(),
            state: self.state,
            updated_at: self.updated_at,
        }
    }

    // It's OK if there are no subscribers.
    fn publish(&self) {
        if self
            .update_tx
            .send(ContainerUpdate::Changed(self.snapshot()))
            .is_err()
        {
            trace!("no receivers for container update");
        }
    }
}

/// Handle for a ContainerActor
///
/// Cheap to clone. Sending never blocks, the queue is unbounded so the registry
/// can address actors without waiting on them.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    sender: mpsc::UnboundedSender<ContainerCommand>,
    identity: Arc<ContainerIdentity>,
    cancel: CancellationToken,
}

impl ContainerHandle {
    /// Spawn a new container actor
    ///
    /// The actor's token is a child of `parent`, so cancelling the parent stops
    /// the actor and everything bound to its token.
    pub fn spawn(
        identity: ContainerIdentity,
        running: bool,
        update_tx: broadcast::Sender<ContainerUpdate>,
        parent: &CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let identity = Arc::new(identity);
        let cancel = parent.child_token();

        let actor = ContainerActor::new(
            identity.clone(),
            running,
            cmd_rx,
            update_tx,
            cancel.clone(),
        );

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            identity,
            cancel,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.identity.id
    }

    /// Identity is immutable and therefore readable without a snapshot
    pub fn identity(&self) -> &ContainerIdentity {
        &self.identity
    }

    /// Token that fires when this container is retired
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn update_metrics(&self, sample: UsageSample) -> Result<()> {
        self.send(ContainerCommand::UpdateMetrics {
            sample: Box::new(sample),
        })
    }

    pub fn set_running(&self, action: EventAction) -> Result<()> {
        self.send(ContainerCommand::SetRunning { action })
    }

    /// Current identity and state, `None` once the actor is retired
    pub async fn snapshot(&self) -> Option<ContainerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(ContainerCommand::Snapshot { respond_to: tx }).ok()?;

        rx.await.ok()
    }

    /// Retire the actor. Idempotent and never blocks.
    pub fn retire(&self) {
        let _ = self.sender.send(ContainerCommand::Retire);
        self.cancel.cancel();
    }

    pub fn is_retired(&self) -> bool {
        self.sender.is_closed()
    }

    fn send(&self, cmd: ContainerCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .map_err(|_| anyhow!("container {} is retired", self.identity.id))
    }
}
