use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LumenConfig {
    pub state: StateConfig,
    pub pulse: PulseConfig,
    pub lifecycle: LifecycleConfig,
    pub intake: IntakeConfig,
    pub triggers: TriggerConfig,
}

impl LumenConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: LumenConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LUMEN_STATE_PATH") {
            self.state.state_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LUMEN_SCENES_DIR") {
            self.state.scenes_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LUMEN_PULSE_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.pulse.interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("LUMEN_EXPIRATION_MINUTES") {
            if let Ok(n) = v.parse() {
                self.lifecycle.expiration_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("LUMEN_DROPZONE") {
            self.intake.dropzone_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LUMEN_TRIGGER_RULES") {
            self.triggers.rules_path = PathBuf::from(v);
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Durable persona snapshot (JSON).
    pub state_path: PathBuf,
    /// Directory of `<scene>.json` definitions.
    pub scenes_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("runtime/state.json"),
            scenes_dir: PathBuf::from("scenes"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub interval_secs: u64,
    /// Upper bound on any single idle-maintenance step, so a slow step
    /// cannot stall the pulse indefinitely.
    pub maintenance_step_timeout_secs: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            maintenance_step_timeout_secs: 10,
        }
    }
}

impl PulseConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.maintenance_step_timeout_secs.max(1))
    }
}

/// What the lifecycle sweep does with a staged item whose timestamp is
/// missing or unparseable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedTimestampPolicy {
    /// Log the failure and keep the item active.
    #[default]
    Retain,
    /// Treat the item as already expired and archive it.
    Archive,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Active staging buffer (JSON list).
    pub memory_path: PathBuf,
    /// Archive sink (JSON list, append-only).
    pub archive_path: PathBuf,
    pub expiration_minutes: u64,
    pub sweep_interval_secs: u64,
    pub malformed_timestamps: MalformedTimestampPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            memory_path: PathBuf::from("runtime/memory.json"),
            archive_path: PathBuf::from("chronicles/memory_archive.json"),
            expiration_minutes: 60,
            sweep_interval_secs: 10,
            malformed_timestamps: MalformedTimestampPolicy::Retain,
        }
    }
}

impl LifecycleConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_minutes.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Bounded wait on each queue dequeue.
    pub poll_timeout_ms: u64,
    pub dropzone_dir: PathBuf,
    pub watch_dropzone: bool,
    /// How many semantic recollections feed the background context.
    pub background_context_limit: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            dropzone_dir: PathBuf::from("dropzone"),
            watch_dropzone: true,
            background_context_limit: 5,
        }
    }
}

impl IntakeConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub rules_path: PathBuf,
    pub interval_secs: u64,
    /// How many of the newest short-term memories each poll inspects.
    pub window: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("config/lore_triggers.json"),
            interval_secs: 5,
            window: 20,
        }
    }
}

impl TriggerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = LumenConfig::default();
        assert_eq!(cfg.state.state_path, PathBuf::from("runtime/state.json"));
        assert_eq!(cfg.pulse.interval_secs, 5);
        assert_eq!(cfg.lifecycle.expiration_minutes, 60);
        assert_eq!(cfg.lifecycle.malformed_timestamps, MalformedTimestampPolicy::Retain);
        assert!(cfg.intake.watch_dropzone);
    }

    #[test]
    fn test_huge_expiration_saturates() {
        let cfg = LifecycleConfig {
            expiration_minutes: u64::MAX,
            ..LifecycleConfig::default()
        };
        assert_eq!(cfg.expiration(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[pulse]
interval_secs = 2
"#;
        let cfg: LumenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.pulse.interval_secs, 2);
        // Defaults for unspecified fields
        assert_eq!(cfg.pulse.maintenance_step_timeout_secs, 10);
        assert_eq!(cfg.triggers.window, 20);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[state]
state_path = "data/state.json"
scenes_dir = "data/scenes"

[pulse]
interval_secs = 3
maintenance_step_timeout_secs = 4

[lifecycle]
memory_path = "data/memory.json"
archive_path = "data/archive.json"
expiration_minutes = 15
sweep_interval_secs = 30
malformed_timestamps = "archive"

[intake]
poll_timeout_ms = 250
dropzone_dir = "inbox"
watch_dropzone = false
background_context_limit = 3

[triggers]
rules_path = "data/triggers.json"
interval_secs = 7
window = 50
"#;
        let cfg: LumenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.state.scenes_dir, PathBuf::from("data/scenes"));
        assert_eq!(cfg.pulse.step_timeout(), Duration::from_secs(4));
        assert_eq!(cfg.lifecycle.expiration(), Duration::from_secs(15 * 60));
        assert_eq!(cfg.lifecycle.malformed_timestamps, MalformedTimestampPolicy::Archive);
        assert_eq!(cfg.intake.poll_timeout(), Duration::from_millis(250));
        assert!(!cfg.intake.watch_dropzone);
        assert_eq!(cfg.triggers.window, 50);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let cfg: LumenConfig = toml::from_str("[pulse]\ninterval_secs = 0\n").unwrap();
        assert_eq!(cfg.pulse.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        // Part 1: env overrides
        std::env::set_var("LUMEN_PULSE_INTERVAL", "9");
        std::env::set_var("LUMEN_DROPZONE", "/tmp/lumen-drop");

        let mut cfg = LumenConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.pulse.interval_secs, 9);
        assert_eq!(cfg.intake.dropzone_dir, PathBuf::from("/tmp/lumen-drop"));

        // Clean up env vars before testing defaults
        std::env::remove_var("LUMEN_PULSE_INTERVAL");
        std::env::remove_var("LUMEN_DROPZONE");

        // Part 2: nonexistent path returns defaults (no env interference)
        let cfg = LumenConfig::load_or_default("/nonexistent/lumen.toml");
        assert_eq!(cfg.pulse.interval_secs, 5);
    }
}
