//! Opt-in flag watcher
//!
//! Follows reloads of the parameter file and toggles the HTTP redirection
//! whenever the opt-in flag flips.

use crate::redirection::trigger_redirection;
use gridshim_common::{BackoffPolicy, ConfigSnapshot, ParamStore, Result, ScriptInvoker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Redirection scripts run on an opt-in flip
#[derive(Debug, Clone)]
pub struct RedirectionScripts {
    pub inject: String,
    pub remove: String,
    pub timeout: Duration,
    pub policy: BackoffPolicy,
}

pub struct ConfigWatcher {
    params: ParamStore,
    snapshot: Arc<ConfigSnapshot>,
    invoker: Arc<dyn ScriptInvoker>,
    scripts: RedirectionScripts,
    /// Upper bound on a single wait for a change
    wait_timeout: Duration,
    changes: watch::Receiver<u64>,
}

impl ConfigWatcher {
    pub fn new(
        params: ParamStore,
        snapshot: Arc<ConfigSnapshot>,
        invoker: Arc<dyn ScriptInvoker>,
        scripts: RedirectionScripts,
        wait_timeout: Duration,
    ) -> Self {
        let changes = params.subscribe();
        Self {
            params,
            snapshot,
            invoker,
            scripts,
            wait_timeout,
            changes,
        }
    }

    /// Inject the redirection if the live flag is set. Runs once before
    /// [`ConfigWatcher::run`]; the caller treats a failure as fatal.
    pub async fn inject_if_opted_in(&self) -> Result<()> {
        if !self.params.opted_in() {
            info!("Not opted in, leaving redirection untouched");
            return Ok(());
        }

        trigger_redirection(
            self.invoker.as_ref(),
            &self.scripts.inject,
            &[],
            &self.scripts.policy,
            self.scripts.timeout,
        )
        .await?;
        self.snapshot.record_opt_in(true);
        Ok(())
    }

    /// Wait for parameter reloads until cancelled. The live flag is compared
    /// with the snapshot once on entry, so flips that happened before the
    /// first wait are not lost.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Watching opt-in flag");

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Opt-in watcher stopped");
                return;
            }
            _ = self.handle_change() => {}
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.wait_timeout) => {
                    debug!("No parameter change within {:?}", self.wait_timeout);
                }
                changed = self.changes.changed() => {
                    if changed.is_err() {
                        warn!("Parameter source closed, stopping opt-in watcher");
                        break;
                    }
                    // A toggle may sit in its retry delays; shutdown must not wait for it
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.handle_change() => {}
                    }
                }
            }
        }

        info!("Opt-in watcher stopped");
    }

    /// Re-read the opt-in flag and toggle redirection if it flipped.
    /// Returns whether a redirection script was run.
    pub async fn handle_change(&self) -> bool {
        let opt_in = self.params.opted_in();
        if !self.snapshot.record_opt_in(opt_in) {
            debug!("Opt-in flag unchanged ({})", opt_in);
            return false;
        }

        let script = if opt_in {
            info!("Opted in again, injecting redirection");
            &self.scripts.inject
        } else {
            info!("Opted out, removing redirection");
            &self.scripts.remove
        };

        if let Err(e) = trigger_redirection(
            self.invoker.as_ref(),
            script,
            &[],
            &self.scripts.policy,
            self.scripts.timeout,
        )
        .await
        {
            error!("Failed to toggle redirection with {}: {}", script, e);
        }
        true
    }
}
