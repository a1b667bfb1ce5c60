//! Lifecycle contract for supervised subsystems.

use crate::Result;
use async_trait::async_trait;

/// A long-running subsystem managed by the supervisor.
///
/// The supervisor calls `init` before every `start`, and may `stop` and
/// re-initialise a component any number of times. `stop` must be idempotent
/// and safe to call before `start` has finished spawning its background work.
#[async_trait]
pub trait Component: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Prepare fresh state for a run (cancellation signal, handles).
    async fn init(&mut self) -> Result<()>;

    /// Launch the component's background work.
    async fn start(&mut self) -> Result<()>;

    /// Mandatory precondition: whether this node should run the component.
    /// Evaluated fresh on every call.
    fn check(&self) -> bool;

    /// Signal background work to exit and wait for it within a grace period.
    async fn stop(&mut self);

    /// Whether the component is currently running.
    fn is_up(&self) -> bool;
}
