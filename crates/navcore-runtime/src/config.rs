//! Runtime configuration – timeouts, endpoint names and dependency lists.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file
//! at all) yields a working configuration.  `NAVCORE_*` environment
//! variables override the parsed values.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Wait for a service endpoint before its first call.
    pub connect_secs: u64,
    /// Call that switches an algorithm on.
    pub enable_call_secs: u64,
    /// Call that switches an algorithm off.
    pub disable_call_secs: u64,
    /// Realtime pose reporting on/off.
    pub pose_call_secs: u64,
    /// Deadline for the relocalization result notification.
    pub relocalization_wait_secs: u64,
    pub lifecycle_transition_secs: u64,
    pub action_server_secs: u64,
    /// Base tracking on/off around behavior switches.
    pub tracking_switch_ms: u64,
    pub stair_align_secs: u64,
    /// How long `stop` waits for an interrupted run to settle.
    pub stop_wait_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            enable_call_secs: 50,
            disable_call_secs: 10,
            pose_call_secs: 5,
            relocalization_wait_secs: 120,
            lifecycle_transition_secs: 10,
            action_server_secs: 5,
            tracking_switch_ms: 2000,
            stair_align_secs: 30,
            stop_wait_secs: 10,
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
    pub fn enable_call(&self) -> Duration {
        Duration::from_secs(self.enable_call_secs)
    }
    pub fn disable_call(&self) -> Duration {
        Duration::from_secs(self.disable_call_secs)
    }
    pub fn pose_call(&self) -> Duration {
        Duration::from_secs(self.pose_call_secs)
    }
    pub fn relocalization_wait(&self) -> Duration {
        Duration::from_secs(self.relocalization_wait_secs)
    }
    pub fn lifecycle_transition(&self) -> Duration {
        Duration::from_secs(self.lifecycle_transition_secs)
    }
    pub fn action_server(&self) -> Duration {
        Duration::from_secs(self.action_server_secs)
    }
    pub fn tracking_switch(&self) -> Duration {
        Duration::from_millis(self.tracking_switch_ms)
    }
    pub fn stair_align(&self) -> Duration {
        Duration::from_secs(self.stair_align_secs)
    }
    pub fn stop_wait(&self) -> Duration {
        Duration::from_secs(self.stop_wait_secs)
    }
}

/// Remote service and action names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub start_location: String,
    pub stop_location: String,
    pub pose_enable: String,
    pub start_mapping: String,
    pub stop_mapping: String,
    pub tracking_target: String,
    pub tracking_command: String,
    pub autonomously_tracking: String,
    pub stair_align: String,
    pub stair_jump: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            start_location: "start_location".into(),
            stop_location: "stop_location".into(),
            pose_enable: "PoseEnable".into(),
            start_mapping: "start_mapping".into(),
            stop_mapping: "stop_mapping".into(),
            tracking_target: "tracking_target".into(),
            tracking_command: "tracking_command".into(),
            autonomously_tracking: "autonomously_tracking".into(),
            stair_align: "stair_align".into(),
            stair_jump: "stair_jump".into(),
        }
    }
}

/// Lifecycle nodes each executor brings up, in activation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dependencies {
    pub localization: Vec<String>,
    pub mapping: Vec<String>,
    pub tracking: Vec<String>,
    pub auto_tracking: Vec<String>,
    pub stair_jumping: Vec<String>,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self {
            localization: vec!["camera/camera".into(), "localization_node".into()],
            mapping: vec!["camera/camera".into(), "map_builder".into()],
            tracking: vec!["navigation".into(), "mcr_uwb".into()],
            auto_tracking: Vec::new(),
            stair_jumping: Vec::new(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RuntimeConfig
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub timeouts: Timeouts,
    pub endpoints: Endpoints,
    pub dependencies: Dependencies,
}

impl RuntimeConfig {
    /// Parse TOML text and apply environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg: RuntimeConfig = toml::from_str(raw)?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    /// Every lifecycle node named by any executor, first occurrence wins.
    pub fn lifecycle_nodes(&self) -> Vec<String> {
        let d = &self.dependencies;
        let mut nodes: Vec<String> = Vec::new();
        for name in d
            .localization
            .iter()
            .chain(&d.mapping)
            .chain(&d.tracking)
            .chain(&d.auto_tracking)
            .chain(&d.stair_jumping)
        {
            if !nodes.contains(name) {
                nodes.push(name.clone());
            }
        }
        nodes
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<RuntimeConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    RuntimeConfig::from_toml_str(&raw).map(Some)
}

/// Apply `NAVCORE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `NAVCORE_CONNECT_SECS` | `timeouts.connect_secs` |
/// | `NAVCORE_RELOCALIZATION_WAIT_SECS` | `timeouts.relocalization_wait_secs` |
/// | `NAVCORE_TRACKING_SWITCH_MS` | `timeouts.tracking_switch_ms` |
/// | `NAVCORE_LIFECYCLE_TRANSITION_SECS` | `timeouts.lifecycle_transition_secs` |
pub fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    let t = &mut cfg.timeouts;
    override_u64("NAVCORE_CONNECT_SECS", &mut t.connect_secs);
    override_u64(
        "NAVCORE_RELOCALIZATION_WAIT_SECS",
        &mut t.relocalization_wait_secs,
    );
    override_u64("NAVCORE_TRACKING_SWITCH_MS", &mut t.tracking_switch_ms);
    override_u64(
        "NAVCORE_LIFECYCLE_TRANSITION_SECS",
        &mut t.lifecycle_transition_secs,
    );
}

fn override_u64(var: &str, field: &mut u64) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse::<u64>() {
        Ok(value) => *field = value,
        Err(_) => warn!(var, value = %raw, "ignoring unparseable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
        assert_eq!(cfg.timeouts.relocalization_wait(), Duration::from_secs(120));
        assert_eq!(cfg.timeouts.tracking_switch(), Duration::from_millis(2000));
        assert_eq!(cfg.endpoints.pose_enable, "PoseEnable");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: RuntimeConfig = toml::from_str(
            r#"
            [timeouts]
            enable_call_secs = 20

            [dependencies]
            localization = ["lidar", "localization_node"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.timeouts.enable_call_secs, 20);
        assert_eq!(cfg.timeouts.connect_secs, 5);
        assert_eq!(cfg.dependencies.localization, vec!["lidar", "localization_node"]);
        assert_eq!(cfg.dependencies.tracking, vec!["navigation", "mcr_uwb"]);
    }

    #[test]
    fn lifecycle_nodes_are_deduplicated_in_order() {
        let cfg = RuntimeConfig::default();
        assert_eq!(
            cfg.lifecycle_nodes(),
            vec![
                "camera/camera",
                "localization_node",
                "map_builder",
                "navigation",
                "mcr_uwb"
            ]
        );
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_from(&dir.path().join("navcore.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_from_reads_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("navcore.toml");
        std::fs::write(&path, "[endpoints]\ntracking_target = \"follow_target\"\n").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.endpoints.tracking_target, "follow_target");
        assert_eq!(cfg.endpoints.tracking_command, "tracking_command");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = RuntimeConfig::from_toml_str("[timeouts\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_override_sets_relocalization_wait() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("NAVCORE_RELOCALIZATION_WAIT_SECS", "45") };
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.timeouts.relocalization_wait(), Duration::from_secs(45));
        unsafe { std::env::remove_var("NAVCORE_RELOCALIZATION_WAIT_SECS") };
    }

    #[test]
    fn unparseable_env_override_keeps_default() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("NAVCORE_TRACKING_SWITCH_MS", "fast") };
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.timeouts.tracking_switch_ms, 2000);
        unsafe { std::env::remove_var("NAVCORE_TRACKING_SWITCH_MS") };
    }
}
