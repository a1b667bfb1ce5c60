//! Grid inventory: upstream member/grid parsing and local hotfix and manifest files.

use crate::upstream::UpstreamResponse;
use gridshim_common::{Error, Hotfix, HotfixReport, MemberRecord, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fields requested for every `member` query
pub const MEMBER_FIELDS: &str =
    "config_addr_type,master_candidate,platform,vip_setting,node_info,host_name,enable_ha";

/// Version of the `/grid_data` payload
pub const GRID_DATA_VERSION: &str = "1";

#[derive(Debug, Deserialize)]
struct GridName {
    #[serde(default)]
    name: String,
}

/// Flatten the batch response of a `member` query.
pub fn parse_members(response: &UpstreamResponse) -> Result<Vec<MemberRecord>> {
    let batches: Vec<Vec<MemberRecord>> = response.json()?;
    Ok(batches.into_iter().flatten().collect())
}

/// Grid name from the batch response of a `grid` query. The last entry wins.
pub fn parse_grid_name(response: &UpstreamResponse) -> Result<String> {
    let batches: Vec<Vec<GridName>> = response.json()?;
    Ok(batches
        .into_iter()
        .flatten()
        .last()
        .map(|g| g.name)
        .unwrap_or_default())
}

/// Find a member by its upstream reference (`<object>/<id>`).
pub fn find_member(members: Vec<MemberRecord>, unique_id: &str) -> Option<MemberRecord> {
    members.into_iter().find(|m| m.reference == unique_id)
}

pub fn hotfix_file(dir: &Path, hostname: &str) -> PathBuf {
    dir.join(format!("hotfix_{}", hostname))
}

/// Hotfixes recorded for `hostname`. A missing file means none were collected yet.
pub async fn load_hotfixes(dir: &Path, hostname: &str) -> Result<Vec<Hotfix>> {
    let path = hotfix_file(dir, hostname);
    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("No hotfix data available for {} ({})", hostname, path.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(Error::LocalResource(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let report: HotfixReport = serde_json::from_slice(&content).map_err(|e| {
        Error::LocalResource(format!("malformed hotfix file {}: {}", path.display(), e))
    })?;
    let hotfixes: Vec<Hotfix> = report.into();
    debug!("Loaded {} hotfixes for {}", hotfixes.len(), hostname);
    Ok(hotfixes)
}

/// Read the cloud hotfix manifest as opaque JSON.
pub async fn read_manifest(path: &Path) -> Result<serde_json::Value> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| Error::LocalResource(format!("cannot read {}: {}", path.display(), e)))?;
    let manifest = serde_json::from_slice(&content).map_err(|e| {
        Error::LocalResource(format!("malformed manifest {}: {}", path.display(), e))
    })?;
    info!("Served cloud manifest from {}", path.display());
    Ok(manifest)
}
