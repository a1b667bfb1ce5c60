//! Inventory collection
//!
//! Background component with two tasks: one records the grid identity (UUID
//! and software version), the other periodically asks the appliance to
//! refresh the per-host hotfix files served by the API.

use async_trait::async_trait;
use gridshim_common::{
    retry, BackoffPolicy, Component, ConfigSnapshot, Error, GridIdentity, ParamStore, Result,
    ScriptInvoker,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Collector settings
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub grid_data_script: String,
    pub hotfix_script: String,
    pub grid_data_timeout: Duration,
    pub hotfix_timeout: Duration,
    pub hotfix_interval: Duration,
    /// Retry policy for the grid identity script
    pub identity_policy: BackoffPolicy,
    pub shutdown_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            grid_data_script: "collect_grid_data".to_string(),
            hotfix_script: "trigger_hotfix_manifest".to_string(),
            grid_data_timeout: Duration::from_secs(200),
            hotfix_timeout: Duration::from_secs(30),
            hotfix_interval: Duration::from_secs(5 * 60),
            identity_policy: BackoffPolicy::exponential(
                Duration::from_secs(60),
                Duration::from_secs(10 * 60),
            ),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HotfixTriggerReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct InventoryCollector {
    config: CollectorConfig,
    invoker: Arc<dyn ScriptInvoker>,
    params: ParamStore,
    snapshot: Arc<ConfigSnapshot>,
    cancel: CancellationToken,
    /// Hotfix polling loop; runs for the component's whole life
    poller: Option<JoinHandle<()>>,
    /// Grid identity collection; finishes once the identity is known
    identity: Option<JoinHandle<()>>,
}

impl InventoryCollector {
    pub fn new(
        config: CollectorConfig,
        invoker: Arc<dyn ScriptInvoker>,
        params: ParamStore,
        snapshot: Arc<ConfigSnapshot>,
    ) -> Self {
        Self {
            config,
            invoker,
            params,
            snapshot,
            cancel: CancellationToken::new(),
            poller: None,
            identity: None,
        }
    }
}

#[async_trait]
impl Component for InventoryCollector {
    fn name(&self) -> &str {
        "inventory-collector"
    }

    async fn init(&mut self) -> Result<()> {
        self.cancel = CancellationToken::new();
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let config = self.config.clone();
        let invoker = self.invoker.clone();
        let snapshot = self.snapshot.clone();
        let cancel = self.cancel.clone();

        self.identity = Some(tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                identity = collect_grid_identity(invoker.as_ref(), &config) => match identity {
                    Ok(identity) => {
                        info!(
                            "Grid identity collected: uuid {} version {}",
                            identity.grid_uuid, identity.nios_version
                        );
                        snapshot.set_grid_identity(identity);
                    }
                    Err(e) => warn!("Not able to collect grid UUID and version: {}", e),
                },
            }
        }));

        let config = self.config.clone();
        let invoker = self.invoker.clone();
        let cancel = self.cancel.clone();

        self.poller = Some(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = trigger_hotfix_collection(invoker.as_ref(), &config).await {
                    error!("Hotfix collection failed: {}", e);
                }
                debug!("Next hotfix collection in {:?}", config.hotfix_interval);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.hotfix_interval) => {}
                }
            }
            info!("Inventory collector stopped");
        }));

        Ok(())
    }

    fn check(&self) -> bool {
        self.params.is_eligible_node() && self.params.opted_in()
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        let handles = [self.poller.take(), self.identity.take()];

        for mut handle in handles.into_iter().flatten() {
            if tokio::time::timeout(self.config.shutdown_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!("Inventory collector task did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    fn is_up(&self) -> bool {
        self.poller.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Run the grid data script until it answers or the identity policy gives up.
pub async fn collect_grid_identity(
    invoker: &dyn ScriptInvoker,
    config: &CollectorConfig,
) -> Result<GridIdentity> {
    let script = config.grid_data_script.as_str();
    let timeout = config.grid_data_timeout;

    retry(
        &config.identity_policy,
        "grid data collection",
        move || async move {
            let output = invoker.invoke(script, &[], timeout).await?;
            if !output.is_success() {
                return Err(Error::Script {
                    script: script.to_string(),
                    message: format!("exec endpoint returned {}", output.status),
                });
            }
            output.json::<GridIdentity>()
        },
        |_| true,
    )
    .await
}

/// Ask the appliance to refresh the hotfix files of every node.
pub async fn trigger_hotfix_collection(
    invoker: &dyn ScriptInvoker,
    config: &CollectorConfig,
) -> Result<()> {
    let script = config.hotfix_script.as_str();
    let output = invoker
        .invoke(script, &["--trigger".to_string()], config.hotfix_timeout)
        .await?;
    if !output.is_success() {
        return Err(Error::Script {
            script: script.to_string(),
            message: format!("exec endpoint returned {}", output.status),
        });
    }

    let reply: HotfixTriggerReply = output.json()?;
    if reply.code != 0 {
        return Err(Error::Script {
            script: script.to_string(),
            message: reply.message,
        });
    }

    info!("Hotfix collection triggered");
    Ok(())
}
