//! Component supervision loop
//!
//! Keeps every component in the state its mandatory check asks for: eligible
//! components that are down get restarted after a cooldown, running components
//! that became ineligible get stopped. Component failures are logged and
//! retried on the next pass, never propagated.

use gridshim_common::Component;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supervision timing
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between supervision passes
    pub interval: Duration,
    /// Wait between stopping a failed component and restarting it
    pub cooldown: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Supervisor that owns the daemon's components
pub struct Supervisor {
    components: Vec<Box<dyn Component>>,
    config: SupervisorConfig,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        components: Vec<Box<dyn Component>>,
        config: SupervisorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            components,
            config,
            cancel,
        }
    }

    /// Bring up every eligible component once.
    pub async fn startup_pass(&mut self) {
        for component in self.components.iter_mut() {
            if !component.check() {
                error!("Mandatory check failed, not starting {}", component.name());
                continue;
            }
            if let Err(e) = bring_up(component.as_mut()).await {
                error!("Failed to start {}: {}", component.name(), e);
            }
        }
    }

    /// Run supervision passes until cancelled.
    pub async fn run(&mut self) {
        info!(
            "Supervisor started (interval {:?}, cooldown {:?})",
            self.config.interval, self.config.cooldown
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
            self.supervise_pass().await;
        }

        info!("Supervisor stopped");
    }

    /// Reconcile every component with its current check result.
    pub async fn supervise_pass(&mut self) {
        debug!("Running supervision pass");

        for component in self.components.iter_mut() {
            let up = component.is_up();
            let eligible = component.check();

            match (up, eligible) {
                // Should be running but isn't
                (false, true) => {
                    warn!("{} is down, restarting", component.name());
                    component.stop().await;

                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.config.cooldown) => {}
                    }

                    match bring_up(component.as_mut()).await {
                        Ok(()) => info!("Restarted {}", component.name()),
                        Err(e) => error!("Failed to restart {}: {}", component.name(), e),
                    }
                }

                // Is running but shouldn't be
                (true, false) => {
                    component.stop().await;
                    info!("Stopped {}: mandatory check no longer holds", component.name());
                }

                _ => {}
            }
        }
    }

    /// Stop every running component.
    pub async fn shutdown(&mut self) {
        for component in self.components.iter_mut() {
            if component.is_up() {
                info!("Stopping {}", component.name());
                component.stop().await;
            }
        }
    }
}

async fn bring_up(component: &mut dyn Component) -> gridshim_common::Result<()> {
    component.init().await?;
    component.start().await?;
    info!("{} started", component.name());
    Ok(())
}
