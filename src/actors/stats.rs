//! Per-container stat streaming
//!
//! One task per tracked container, spawned by the registry at the moment the
//! container is inserted and never again while it stays tracked.
//!
//! ## Message Flow
//!
//! ```text
//! runtime stats stream → UsageSample → ContainerActor::UpdateMetrics
//!                      └ transport error → Registry::StatStreamFailed
//! ```
//!
//! The task owns the stream handle and drops it on exit. It exits when the
//! container's token is cancelled, when the stream ends, when the stream fails
//! or when the actor no longer accepts commands.

use std::sync::Arc;

use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, instrument, trace, warn};

use crate::runtime::ContainerRuntime;

use super::{container::ContainerHandle, messages::RegistryCommand};

/// Spawn the stat stream of `container`
///
/// Failures are reported through a weak registry sender so that running
/// streams never keep the registry queue alive on their own.
pub fn spawn_stat_stream(
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerHandle,
    registry: mpsc::WeakSender<RegistryCommand>,
) -> JoinHandle<()> {
    tokio::spawn(stream_stats(runtime, container, registry))
}

#[instrument(skip_all, fields(container = %container.identity().name))]
async fn stream_stats(
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerHandle,
    registry: mpsc::WeakSender<RegistryCommand>,
) {
    debug!("starting stat stream");

    let cancel = container.cancellation();
    let mut samples = runtime.stream_stats(container.id());

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("container retired, closing stat stream");
                break;
            }

            item = samples.next() => match item {
                Some(Ok(sample)) => {
                    trace!("received stat sample");
                    if container.update_metrics(sample).is_err() {
                        debug!("container actor gone, closing stat stream");
                        break;
                    }
                }

                Some(Err(e)) => {
                    warn!("stat stream failed: {e}");
                    report_failure(&registry, &container).await;
                    break;
                }

                None => {
                    info!("end of container stats");
                    break;
                }
            }
        }
    }

    debug!("stat stream stopped");
}

async fn report_failure(registry: &mpsc::WeakSender<RegistryCommand>, container: &ContainerHandle) {
    let Some(registry) = registry.upgrade() else {
        trace!("registry gone, not reporting stat stream failure");
        return;
    };

    let cmd = RegistryCommand::StatStreamFailed {
        container_id: container.id().clone(),
    };

    if registry.send(cmd).await.is_err() {
        trace!("registry stopped before stat stream failure was reported");
    }
}
