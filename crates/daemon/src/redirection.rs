//! HTTP redirection toggling
//!
//! Injecting or removing the appliance's HTTP redirection is done by a local
//! script. The script must answer `{"status": "SUCCESS"}` for the toggle to
//! count as applied.

use gridshim_common::{retry, BackoffPolicy, Error, Result, ScriptInvoker};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct RedirectionReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: String,
}

/// Run a redirection script under `policy`. Transport errors and non-200
/// answers are retried; a reply other than `SUCCESS` is a definitive failure.
pub async fn trigger_redirection(
    invoker: &dyn ScriptInvoker,
    script: &str,
    args: &[String],
    policy: &BackoffPolicy,
    timeout: Duration,
) -> Result<()> {
    let output = retry(
        policy,
        script,
        move || async move {
            let output = invoker.invoke(script, args, timeout).await?;
            if output.is_success() {
                Ok(output)
            } else {
                Err(Error::Script {
                    script: script.to_string(),
                    message: format!("exec endpoint returned {}", output.status),
                })
            }
        },
        |_| true,
    )
    .await?;

    let reply: RedirectionReply = output.json()?;
    if reply.status != "SUCCESS" {
        error!(
            "Redirection script {} did not apply: {} {}",
            script, reply.status, reply.error
        );
        return Err(Error::Script {
            script: script.to_string(),
            message: format!("status {:?}: {}", reply.status, reply.error),
        });
    }

    info!("Redirection script {} applied", script);
    Ok(())
}
