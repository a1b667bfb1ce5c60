//! Live appliance parameters
//!
//! The appliance drops a JSON parameter file (`params.json`) that carries node
//! labels such as the opt-in flag, the node role and the hardware identifier.
//! [`ParamStore`] exposes it through dotted-key lookups (`labels.heka_optin`)
//! and publishes a change notification whenever the file is rewritten.
//!
//! [`ConfigSnapshot`] holds the process-wide values derived from it.

use crate::types::GridIdentity;
use crate::{Error, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const KEY_OPT_IN: &str = "labels.heka_optin";
pub const KEY_HARDWARE_ID: &str = "labels.hardware_id";
pub const KEY_NODE_ROLE: &str = "labels.nios_role";
pub const KEY_HA_STATUS: &str = "labels.ha_status";

/// Node roles allowed to host the UI backend
const ELIGIBLE_ROLES: &[&str] = &["GM", "standalone"];
/// HA states allowed to host the UI backend
const ELIGIBLE_HA_STATES: &[&str] = &["Active", "Not Configured"];

/// Parameter file with change notification
#[derive(Clone)]
pub struct ParamStore {
    inner: Arc<ParamInner>,
}

struct ParamInner {
    path: PathBuf,
    values: RwLock<Value>,
    /// Bumped on every successful reload
    changes: watch::Sender<u64>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ParamStore {
    /// Load the parameter file at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = read_params(&path)?;
        info!("Loaded parameters from {}", path.display());
        Ok(Self::with_values(path, values))
    }

    /// Store backed by `values` instead of a file read. `path` is used by
    /// later reloads and by [`ParamStore::watch`].
    pub fn with_values(path: impl Into<PathBuf>, values: Value) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(ParamInner {
                path: path.into(),
                values: RwLock::new(values),
                changes,
                watcher: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Look up a dotted key
    pub fn get(&self, key: &str) -> Option<Value> {
        let values = self.inner.values.read();
        lookup(&values, key).cloned()
    }

    /// Boolean at `key`; missing or non-boolean values read as false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_map(&self, key: &str) -> Option<Map<String, Value>> {
        match self.get(key) {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// Set a dotted key, creating intermediate maps. Runtime values are
    /// replaced by the next reload of the file.
    pub fn set(&self, key: &str, value: Value) {
        let mut values = self.inner.values.write();
        let mut current = &mut *values;
        let mut parts = key.split('.').peekable();

        while let Some(part) = parts.next() {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let Some(map) = current.as_object_mut() else {
                return;
            };
            if parts.peek().is_none() {
                map.insert(part.to_string(), value);
                return;
            }
            current = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    /// Re-read the file and notify subscribers. On error the previous values are kept.
    pub fn reload(&self) -> Result<()> {
        let values = read_params(&self.inner.path)?;
        *self.inner.values.write() = values;
        self.inner.changes.send_modify(|generation| *generation += 1);
        debug!("Reloaded parameters from {}", self.inner.path.display());
        Ok(())
    }

    /// Receiver that observes every successful reload.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Watch the file for writes and reload on change. The parent directory is
    /// watched so that atomic replace-by-rename is picked up as well.
    pub fn watch(&self) -> Result<()> {
        let store = self.clone();
        let target = self.inner.path.clone();
        let file_name = target.file_name().map(|n| n.to_os_string());

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                        if !relevant {
                            return;
                        }
                        info!("Parameter file changed: {:?}", event.kind);
                        if let Err(e) = store.reload() {
                            warn!("Failed to reload parameters, keeping previous values: {}", e);
                        }
                    }
                    Err(e) => warn!("Parameter watcher error: {}", e),
                }
            })?;

        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        *self.inner.watcher.lock() = Some(watcher);

        info!("Watching {} for parameter changes", target.display());
        Ok(())
    }

    // ========================================================================
    // Label helpers
    // ========================================================================

    pub fn opted_in(&self) -> bool {
        self.get_bool(KEY_OPT_IN)
    }

    pub fn hardware_id(&self) -> String {
        self.get_str(KEY_HARDWARE_ID).unwrap_or_default()
    }

    /// Whether this node's role and HA state allow it to host the UI backend.
    pub fn is_eligible_node(&self) -> bool {
        let role = self.get_str(KEY_NODE_ROLE).unwrap_or_default();
        let ha = self.get_str(KEY_HA_STATUS).unwrap_or_default();
        ELIGIBLE_ROLES.contains(&role.as_str()) && ELIGIBLE_HA_STATES.contains(&ha.as_str())
    }
}

fn read_params(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::LocalResource(format!("cannot read {}: {}", path.display(), e))
    })?;
    let values: Value = serde_json::from_str(&content)?;
    if !values.is_object() {
        return Err(Error::InvalidConfig(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }
    Ok(values)
}

fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(root, |value, part| value.get(part))
}

/// Process-wide values observed from the parameter source
#[derive(Debug, Default)]
pub struct ConfigSnapshot {
    opt_in: AtomicBool,
    grid: RwLock<GridIdentity>,
}

impl ConfigSnapshot {
    pub fn new(opt_in: bool) -> Self {
        Self {
            opt_in: AtomicBool::new(opt_in),
            grid: RwLock::new(GridIdentity::default()),
        }
    }

    /// Last observed opt-in flag
    pub fn opt_in(&self) -> bool {
        self.opt_in.load(Ordering::SeqCst)
    }

    /// Record a freshly read opt-in value. Returns true if it differs from the
    /// previously observed one.
    pub fn record_opt_in(&self, value: bool) -> bool {
        self.opt_in.swap(value, Ordering::SeqCst) != value
    }

    pub fn grid_identity(&self) -> GridIdentity {
        self.grid.read().clone()
    }

    pub fn set_grid_identity(&self, identity: GridIdentity) {
        *self.grid.write() = identity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PARAMS: &str = r#"{
        "labels": {
            "heka_optin": true,
            "hardware_id": "564D1234",
            "nios_role": "GM",
            "ha_status": "Active"
        },
        "jointoken": "abc"
    }"#;

    fn write_params(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("params.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_dotted_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamStore::load(write_params(&dir, PARAMS)).unwrap();

        assert!(store.opted_in());
        assert_eq!(store.hardware_id(), "564D1234");
        assert_eq!(store.get_str("jointoken").as_deref(), Some("abc"));
        assert_eq!(store.get_map("labels").unwrap().len(), 4);
        assert!(store.get("labels.missing").is_none());
        assert!(!store.get_bool("labels.nios_role"));
        assert!(store.is_eligible_node());
    }

    #[test]
    fn test_eligibility_requires_role_and_ha_state() {
        let store = ParamStore::with_values(
            "params.json",
            serde_json::json!({"labels": {"nios_role": "MEMBER", "ha_status": "Active"}}),
        );
        assert!(!store.is_eligible_node());

        store.set(KEY_NODE_ROLE, Value::from("standalone"));
        store.set(KEY_HA_STATUS, Value::from("Not Configured"));
        assert!(store.is_eligible_node());
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let store = ParamStore::with_values("params.json", serde_json::json!({}));
        store.set("grid.identity.uuid", Value::from("abcd"));
        assert_eq!(store.get_str("grid.identity.uuid").as_deref(), Some("abcd"));

        // Overwriting a scalar with a nested key replaces it with a map
        store.set("grid.identity.uuid.part", Value::from(1));
        assert_eq!(store.get("grid.identity.uuid.part"), Some(Value::from(1)));
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ParamStore::load(write_params(&dir, "not json")).is_err());
        assert!(ParamStore::load(write_params(&dir, "[1, 2]")).is_err());
        assert!(ParamStore::load(dir.path().join("missing.json")).is_err());
    }

    #[tokio::test]
    async fn test_reload_notifies_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_params(&dir, PARAMS);
        let store = ParamStore::load(&path).unwrap();
        let mut changes = store.subscribe();

        std::fs::write(&path, r#"{"labels": {"heka_optin": false}}"#).unwrap();
        store.reload().unwrap();

        changes.changed().await.unwrap();
        assert!(!store.opted_in());

        // A broken rewrite keeps the previous values
        std::fs::write(&path, "{").unwrap();
        assert!(store.reload().is_err());
        assert!(store.get_map("labels").is_some());
    }

    #[tokio::test]
    async fn test_watch_reloads_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_params(&dir, PARAMS);
        let store = ParamStore::load(&path).unwrap();
        let mut changes = store.subscribe();
        store.watch().unwrap();

        std::fs::write(&path, r#"{"labels": {"heka_optin": false}}"#).unwrap();

        tokio::time::timeout(Duration::from_secs(10), changes.changed())
            .await
            .expect("no change notification")
            .unwrap();
        assert!(!store.opted_in());
    }

    #[test]
    fn test_snapshot_records_changes() {
        let snapshot = ConfigSnapshot::new(true);
        assert!(!snapshot.record_opt_in(true));
        assert!(snapshot.record_opt_in(false));
        assert!(!snapshot.opt_in());

        snapshot.set_grid_identity(GridIdentity {
            grid_uuid: "uuid-1".into(),
            nios_version: "9.0.3".into(),
        });
        assert_eq!(snapshot.grid_identity().grid_uuid, "uuid-1");
    }
}
