//! Layered process configuration.
//!
//! Built once at bootstrap by merging, lowest to highest precedence:
//! compiled-in defaults, an optional `.env` file, process environment
//! variables, and `state_dir/config.json`. The resulting [`Settings`] is
//! immutable and threaded through construction — there is no global
//! override switch (a deliberate departure from the ambient-override
//! pattern this design is grounded against).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ResultExt;

/// Process-wide settings, constructed once and passed by reference/clone
/// into the Terminal Backend, Output Log, and Session Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,

    pub tmux_pane_width: u32,
    pub tmux_pane_height: u32,
    pub tmux_scrollback_lines: u32,

    /// Seconds between background capture-loop ticks.
    pub capture_interval_s: u64,
    /// How many trailing lines of scrollback+visible to read per capture.
    pub capture_tail_lines: usize,

    pub default_working_dir: String,
    pub state_dir: String,
    pub rehydrate_dir_whitelist: Vec<String>,

    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs_home();
        Self {
            app_name: "agentdeck".to_string(),
            tmux_pane_width: 160,
            tmux_pane_height: 35,
            tmux_scrollback_lines: 2_000,
            capture_interval_s: 2,
            capture_tail_lines: 300,
            default_working_dir: home.clone(),
            state_dir: format!("{home}/.agentdeck"),
            rehydrate_dir_whitelist: Vec::new(),
            bind_addr: "127.0.0.1:8420".to_string(),
        }
    }
}

impl Settings {
    /// SQLite database path for the output log.
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.state_dir).join("output.db")
    }

    /// Flat-file path for the recent-directories list.
    pub fn recent_dirs_path(&self) -> PathBuf {
        Path::new(&self.state_dir).join("recent_dirs.txt")
    }

    /// Path of the optional JSON overrides file.
    pub fn config_path(&self) -> PathBuf {
        Path::new(&self.state_dir).join("config.json")
    }

    /// Load settings by layering defaults, `.env`, environment variables,
    /// and `state_dir/config.json`, in that precedence order.
    pub fn load() -> anyhow::Result<Self> {
        // `.env` is optional; a missing file is not an error.
        let _ = dotenvy::dotenv();

        let defaults = Settings::default();
        let mut builder = config::Config::builder()
            .set_default("app_name", defaults.app_name.clone())?
            .set_default("tmux_pane_width", defaults.tmux_pane_width)?
            .set_default("tmux_pane_height", defaults.tmux_pane_height)?
            .set_default("tmux_scrollback_lines", defaults.tmux_scrollback_lines)?
            .set_default("capture_interval_s", defaults.capture_interval_s)?
            .set_default("capture_tail_lines", defaults.capture_tail_lines as i64)?
            .set_default("default_working_dir", defaults.default_working_dir.clone())?
            .set_default("state_dir", defaults.state_dir.clone())?
            .set_default(
                "rehydrate_dir_whitelist",
                Vec::<String>::new(),
            )?
            .set_default("bind_addr", defaults.bind_addr.clone())?;

        // AGENTDECK_STATE overrides state_dir; other fields may be
        // overridden with AGENTDECK_<FIELD_UPPER>.
        builder = builder.add_source(
            config::Environment::with_prefix("AGENTDECK")
                .try_parsing(true)
                .separator("_"),
        );

        let mut settings: Settings = builder
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .unwrap_or(defaults);

        if let Ok(state_dir) = std::env::var("AGENTDECK_STATE") {
            settings.state_dir = state_dir;
        }

        settings = Self::merge_config_file(settings)?;
        Ok(settings)
    }

    /// Merge `state_dir/config.json` on top of `settings`, if present,
    /// expanding `~` in path-shaped fields before the merge.
    fn merge_config_file(mut settings: Settings) -> anyhow::Result<Settings> {
        let config_path = Path::new(&settings.state_dir).join("config.json");
        if !config_path.exists() {
            return Ok(settings);
        }

        let raw = std::fs::read_to_string(&config_path).context_path("read", &config_path)?;
        let mut data: serde_json::Value =
            serde_json::from_str(&raw).context_path("parse", &config_path)?;

        if let Some(obj) = data.as_object_mut() {
            for key in ["default_working_dir", "state_dir"] {
                if let Some(serde_json::Value::String(s)) = obj.get_mut(key) {
                    *s = expand_tilde(s);
                }
            }
            if let Some(serde_json::Value::Array(items)) = obj.get_mut("rehydrate_dir_whitelist")
            {
                for item in items {
                    if let serde_json::Value::String(s) = item {
                        *s = expand_tilde(s);
                    }
                }
            }
        }

        let mut base = serde_json::to_value(&settings)?;
        if let (Some(base_obj), Some(over_obj)) = (base.as_object_mut(), data.as_object()) {
            for (k, v) in over_obj {
                base_obj.insert(k.clone(), v.clone());
            }
        }
        settings = serde_json::from_value(base)?;
        Ok(settings)
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        format!("{}{}", dirs_home(), rest)
    } else {
        path.to_string()
    }
}

fn dirs_home() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_derive_from_state_dir() {
        let mut s = Settings::default();
        s.state_dir = "/tmp/agentdeck-test".to_string();
        assert_eq!(s.db_path(), Path::new("/tmp/agentdeck-test/output.db"));
        assert_eq!(
            s.recent_dirs_path(),
            Path::new("/tmp/agentdeck-test/recent_dirs.txt")
        );
    }

    #[test]
    fn expand_tilde_substitutes_home() {
        let home = dirs_home();
        assert_eq!(expand_tilde("~/work"), format!("{home}/work"));
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }
}
