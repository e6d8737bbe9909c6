//! Actor-based container tracking
//!
//! Each actor runs as an independent tokio task that owns its state and
//! processes commands from an mpsc queue one at a time. Nothing outside the
//! owning task ever touches that state, there are no locks.
//!
//! ## Architecture Overview
//!
//! ```text
//!   inventory scan ─┐                       ┌─► ContainerActor (A) ◄── stat stream (A)
//!                   ├─► RegistryActor ──────┼─► ContainerActor (B) ◄── stat stream (B)
//!   event stream ───┤   (container map)     └─► ContainerActor (N) ◄── stat stream (N)
//!                   │         ▲
//!   QueryGateway ───┘         └──── StatStreamFailed
//! ```
//!
//! ## Actor Types
//!
//! - **ContainerActor**: Owns one container's running flag and usage percentages
//! - **RegistryActor**: Owns the map of live container actors, creates and retires them
//! - **EventStreamActor**: Feeds runtime lifecycle events into the registry
//! - **Stat streams**: One task per container feeding samples into its actor
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel
//! 2. **Events**: Container changes are published to a broadcast channel
//! 3. **Request/Response**: oneshot channels for snapshots and queries

pub mod container;
pub mod events;
pub mod messages;
pub mod registry;
pub mod stats;
