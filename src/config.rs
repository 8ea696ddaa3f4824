use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::keys::KeyCode;
use crate::strategy::StrategyId;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_ms: u64,
    #[serde(default = "default_inter_window_delay")]
    pub inter_window_delay_ms: u64,
    #[serde(default = "default_press_duration")]
    pub press_duration_ms: u64,
    #[serde(default = "default_message_timeout")]
    pub message_timeout_ms: u64,
    #[serde(default)]
    pub broadcast_parallelism: usize,
    #[serde(default)]
    pub hardware_tagging: bool,
    #[serde(default)]
    pub disabled_strategies: Vec<String>,
    #[serde(default)]
    pub direct_input_keywords: Vec<String>,
    #[serde(default)]
    pub raw_input_keywords: Vec<String>,
    #[serde(default)]
    pub target_processes: Vec<String>,
    #[serde(default = "default_toggle_key")]
    pub toggle_key: String,
    #[serde(default = "default_held_keys")]
    pub held_keys: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_maintenance_interval() -> u64 {
    30
}
fn default_inter_window_delay() -> u64 {
    5
}
fn default_press_duration() -> u64 {
    10
}
fn default_message_timeout() -> u64 {
    100
}
fn default_toggle_key() -> String {
    "SCROLLLOCK".to_string()
}
fn default_held_keys() -> Vec<String> {
    ["W", "A", "S", "D"].iter().map(|k| k.to_string()).collect()
}
fn default_log_level() -> String {
    "keycast=info".to_string()
}

/// Upper bound for automatic broadcast parallelism.
const MAX_AUTO_PARALLELISM: usize = 8;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_ms: default_maintenance_interval(),
            inter_window_delay_ms: default_inter_window_delay(),
            press_duration_ms: default_press_duration(),
            message_timeout_ms: default_message_timeout(),
            broadcast_parallelism: 0, // 0 means auto-detect based on CPU cores
            hardware_tagging: false,
            disabled_strategies: vec![],
            direct_input_keywords: vec![],
            raw_input_keywords: vec![],
            target_processes: vec![],
            toggle_key: default_toggle_key(),
            held_keys: default_held_keys(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load config from file, or create default if not exists
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            let default_config = Self::default();
            default_config.save_to_file(&path)?;
            return Ok(default_config);
        }
        Self::load_from_file(path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: EngineConfig = toml::from_str(&content)?;
        config.clamp();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let quoted = |items: &[String]| -> String {
            let inner: Vec<String> = items.iter().map(|s| format!("{s:?}")).collect();
            format!("[{}]", inner.join(", "))
        };

        let content = format!(
            "maintenance_interval_ms = {}     # Held-key re-assertion period (ms, min 10)\n\
             inter_window_delay_ms = {}        # Delay between windows during a broadcast (ms)\n\
             press_duration_ms = {}           # Hold time of a synthetic key press (ms)\n\
             message_timeout_ms = {}         # Timeout for synchronous window messages (ms)\n\
             broadcast_parallelism = {}        # Windows handled concurrently (0 = auto-detect)\n\
             hardware_tagging = {}         # Stamp last-resort input with a real device identity\n\
             toggle_key = {:?}      # Key that starts/stops broadcasting\n\
             log_level = {:?}     # Fallback log filter when RUST_LOG is unset\n\n\
             # Keys broadcast as held (down/up); all other keys are broadcast as presses\n\
             held_keys = {}\n\n\
             # Process image names whose windows receive broadcasts\n\
             target_processes = {}     # Example: [\"game.exe\"]\n\n\
             # Strategies to skip: direct-message, input-control, render-surface,\n\
             # focus-bracket, scan-code, thread-attach, hardware-tagged\n\
             disabled_strategies = {}\n\n\
             # Extra class-name keywords for process classification\n\
             direct_input_keywords = {}\n\
             raw_input_keywords = {}\n",
            self.maintenance_interval_ms,
            self.inter_window_delay_ms,
            self.press_duration_ms,
            self.message_timeout_ms,
            self.broadcast_parallelism,
            self.hardware_tagging,
            self.toggle_key,
            self.log_level,
            quoted(&self.held_keys),
            quoted(&self.target_processes),
            quoted(&self.disabled_strategies),
            quoted(&self.direct_input_keywords),
            quoted(&self.raw_input_keywords),
        );

        fs::write(path, content)?;
        Ok(())
    }

    /// Pulls out-of-range values back into range.
    pub fn clamp(&mut self) {
        if self.maintenance_interval_ms < 10 {
            self.maintenance_interval_ms = 10;
        }
        if self.press_duration_ms < 1 {
            self.press_duration_ms = 1;
        }
        if self.message_timeout_ms < 10 {
            self.message_timeout_ms = 10;
        }
    }

    /// Rejects key and strategy names that do not parse.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.toggle_key_code()?;
        self.held_key_codes()?;
        for name in &self.disabled_strategies {
            name.parse::<StrategyId>()?;
        }
        Ok(())
    }

    pub fn toggle_key_code(&self) -> anyhow::Result<KeyCode> {
        Ok(self.toggle_key.parse()?)
    }

    pub fn held_key_codes(&self) -> anyhow::Result<Vec<KeyCode>> {
        self.held_keys
            .iter()
            .map(|name| Ok(name.parse::<KeyCode>()?))
            .collect()
    }

    /// Disabled strategies; unknown names are ignored here and reported by
    /// [`validate`](Self::validate).
    pub fn disabled_strategy_ids(&self) -> Vec<StrategyId> {
        self.disabled_strategies
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }

    /// Effective broadcast parallelism.
    pub fn parallelism(&self) -> usize {
        if self.broadcast_parallelism == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .min(MAX_AUTO_PARALLELISM)
        } else {
            self.broadcast_parallelism
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.maintenance_interval_ms, 30);
        assert!(!config.hardware_tagging);
        assert_eq!(config.toggle_key_code().unwrap(), KeyCode::SCROLL_LOCK);
        assert_eq!(
            config.held_key_codes().unwrap(),
            vec![KeyCode::W, KeyCode::A, KeyCode::S, KeyCode::D]
        );
        assert!(config.parallelism() >= 1 && config.parallelism() <= MAX_AUTO_PARALLELISM);
    }

    #[test]
    fn test_clamp() {
        let mut config = EngineConfig {
            maintenance_interval_ms: 1,
            press_duration_ms: 0,
            message_timeout_ms: 0,
            ..EngineConfig::default()
        };
        config.clamp();
        assert_eq!(config.maintenance_interval_ms, 10);
        assert_eq!(config.press_duration_ms, 1);
        assert_eq!(config.message_timeout_ms, 10);
    }

    #[test]
    fn test_validate_rejects_unknown_names() {
        let config = EngineConfig {
            disabled_strategies: vec!["teleport".to_string()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(config.disabled_strategy_ids().is_empty());

        let config = EngineConfig {
            held_keys: vec!["NOTAKEY".to_string()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("hardware_tagging = true\n").unwrap();
        assert!(config.hardware_tagging);
        assert_eq!(config.press_duration_ms, 10);
        assert_eq!(config.held_keys.len(), 4);
    }
}
