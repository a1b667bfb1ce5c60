//! Core types for gridshim

use serde::{Deserialize, Serialize};

/// HA status values reported by the upstream for a node that may act as master.
const HA_ACTIVE: &str = "ACTIVE";
const HA_NOT_CONFIGURED: &str = "NOT_CONFIGURED";

/// Service entry that carries the node liveness.
const NODE_STATUS_SERVICE: &str = "NODE_STATUS";
const SERVICE_RUNNING: &str = "Running";

/// Node role within the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeRole {
    Master,
    Member,
}

impl Default for NodeRole {
    fn default() -> Self {
        Self::Member
    }
}

/// Node liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Online,
    Offline,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Offline
    }
}

/// Outcome of a hotfix installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HotfixStatus {
    Success,
    Failure,
}

impl HotfixStatus {
    /// Map the collector's free-form status string.
    pub fn from_report(status: &str) -> Self {
        if status == "successfully" {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Hotfix entry as served to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotfix {
    pub name: String,
    pub timestamp: String,
    pub status: HotfixStatus,
}

/// Per-host hotfix file written by the hotfix manifest collector.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HotfixReport {
    #[serde(default)]
    pub hotfixes: Vec<HotfixReportEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotfixReportEntry {
    pub version: String,
    pub status: String,
    pub timestamp: String,
}

impl From<HotfixReport> for Vec<Hotfix> {
    fn from(report: HotfixReport) -> Self {
        report
            .hotfixes
            .into_iter()
            .map(|entry| Hotfix {
                name: entry.version,
                status: HotfixStatus::from_report(&entry.status),
                timestamp: entry.timestamp,
            })
            .collect()
    }
}

/// Node object served by `/node_data` and `/list_nodes`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub unique_id: String,
    pub ip: String,
    pub hostname: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub ha_enable: bool,
    pub master_candidate: bool,
    #[serde(default)]
    pub hotfixes: Vec<Hotfix>,
}

/// Grid summary served by `/grid_data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub version: String,
    pub nios_version: String,
    pub grid_name: String,
    pub grid_uuid: String,
}

/// Grid identity collected from the appliance database by script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridIdentity {
    #[serde(default)]
    pub grid_uuid: String,
    #[serde(default)]
    pub nios_version: String,
}

// ============================================================================
// Upstream member records
// ============================================================================

/// Member object as returned by the upstream `member` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberRecord {
    #[serde(rename = "_ref")]
    pub reference: String,
    #[serde(default)]
    pub enable_ha: bool,
    #[serde(default)]
    pub master_candidate: bool,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub vip_setting: AddressSetting,
    #[serde(default)]
    pub node_info: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressSetting {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub ha_status: String,
    #[serde(default)]
    pub hwid: String,
    #[serde(default)]
    pub physical_oid: String,
    #[serde(default)]
    pub mgmt_network_setting: AddressSetting,
    #[serde(default)]
    pub service_status: Vec<ServiceStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub service: String,
}

impl ServiceStatus {
    fn reports_online(&self) -> bool {
        self.description == SERVICE_RUNNING && self.service == NODE_STATUS_SERVICE
    }
}

impl MemberRecord {
    /// Convert into the UI node shape. `local_hwid` is this appliance's hardware
    /// identifier; only the node carrying it may be reported as master.
    pub fn to_node(&self, local_hwid: &str) -> Node {
        let online = self
            .node_info
            .iter()
            .flat_map(|info| info.service_status.iter())
            .any(ServiceStatus::reports_online);

        Node {
            unique_id: self.reference.clone(),
            ip: self.vip_setting.address.clone(),
            hostname: self.host_name.clone(),
            role: self.derive_role(local_hwid),
            status: if online {
                NodeStatus::Online
            } else {
                NodeStatus::Offline
            },
            ha_enable: self.enable_ha,
            master_candidate: self.master_candidate,
            hotfixes: Vec::new(),
        }
    }

    fn derive_role(&self, local_hwid: &str) -> NodeRole {
        if !self.master_candidate {
            return NodeRole::Member;
        }

        let is_master = match self.node_info.as_slice() {
            [single] => {
                (single.ha_status == HA_ACTIVE || single.ha_status == HA_NOT_CONFIGURED)
                    && single.hwid == local_hwid
            }
            // HA pair: the active peer must be this appliance
            pair => pair
                .iter()
                .any(|info| info.ha_status == HA_ACTIVE && info.hwid == local_hwid),
        };

        if is_master {
            NodeRole::Master
        } else {
            NodeRole::Member
        }
    }
}
