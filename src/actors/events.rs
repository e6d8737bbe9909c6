//! EventStreamActor - Feeds runtime lifecycle events into the registry
//!
//! Stream errors are logged and the loop continues. When the stream ends the
//! actor reopens it after a short delay and reconciles the inventory once more,
//! since events may have been missed in between.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::runtime::ContainerRuntime;

use super::registry::RegistryHandle;

/// Delay before reopening an event stream that ended
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct EventStreamActor {
    runtime: Arc<dyn ContainerRuntime>,

    registry: RegistryHandle,

    cancel: CancellationToken,

    reconnect_delay: Duration,
}

impl EventStreamActor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: RegistryHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            registry,
            cancel,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Spawn the actor as a tokio task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the token is cancelled or the registry stops
    #[instrument(skip(self), name = "events")]
    pub async fn run(self) {
        debug!("starting event stream actor");

        loop {
            if !self.consume_stream().await {
                break;
            }

            warn!(
                "event stream ended, reopening in {:?}",
                self.reconnect_delay
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }

            if let Err(e) = self.registry.discover().await {
                error!("failed to reconcile containers after reconnect: {e:#}");
            }
        }

        debug!("event stream actor stopped");
    }

    /// Forward events until the stream ends.
    ///
    /// Returns `false` if the actor has to stop.
    async fn consume_stream(&self) -> bool {
        let mut events = self.runtime.stream_events();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancelled, closing event stream");
                    return false;
                }

                item = events.next() => match item {
                    Some(Ok(event)) => {
                        debug!(action = %event.action, container = %event.actor_id, "event");
                        if self.registry.handle_event(event).await.is_err() {
                            warn!("registry stopped, closing event stream");
                            return false;
                        }
                    }

                    Some(Err(e)) => error!("event stream error: {e}"),

                    None => return true,
                }
            }
        }
    }
}
