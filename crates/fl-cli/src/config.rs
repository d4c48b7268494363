//! Configuration loading and management.
//!
//! Process-level knobs only. User-facing settings (focus goal, sleep and
//! lunch windows, timezone mode) live in the database and are edited with
//! `fl settings`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fl_core::scheduler::{DEFAULT_EXTERNAL_BUDGET, DEFAULT_TICK_INTERVAL, DEFAULT_TICK_TIMEOUT};
use fl_core::{Capabilities, TickBudget, ValidationRules};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Whether device-activity monitoring is permitted on this host.
    pub monitoring_permitted: bool,
    /// How long cached statistics stay fresh.
    pub cache_ttl_secs: u64,
    pub detection: DetectionConfig,
    pub tick: TickConfig,
}

/// Focus detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub min_focus_minutes: u32,
    pub dedup_buffer_minutes: u32,
    pub max_focus_hours: u32,
}

/// Background tick timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickConfig {
    pub interval_secs: u64,
    /// Execution budget granted by the host scheduler.
    pub external_budget_secs: u64,
    /// Self-imposed limit, kept below the external budget.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("focuslog.db"),
            monitoring_permitted: true,
            cache_ttl_secs: 300,
            detection: DetectionConfig::default(),
            tick: TickConfig::default(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_focus_minutes: 30,
            dedup_buffer_minutes: 5,
            max_focus_hours: 8,
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_TICK_INTERVAL.as_secs(),
            external_budget_secs: DEFAULT_EXTERNAL_BUDGET.as_secs(),
            timeout_secs: DEFAULT_TICK_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, the user config file, `path`, then
    /// `FL_*` environment variables (`FL_TICK__INTERVAL_SECS` for nested keys).
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("FL_").split("__"));

        figment.extract()
    }

    /// Validator thresholds.
    pub fn validation_rules(&self) -> ValidationRules {
        ValidationRules {
            min_focus: chrono::Duration::minutes(i64::from(self.detection.min_focus_minutes)),
            dedup_buffer: chrono::Duration::minutes(i64::from(
                self.detection.dedup_buffer_minutes,
            )),
            max_focus: chrono::Duration::hours(i64::from(self.detection.max_focus_hours)),
        }
    }

    /// Host capabilities.
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            monitoring_permitted: self.monitoring_permitted,
        }
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX))
    }

    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick.interval_secs)
    }

    /// The tick budget, with the timeout clamped below the external budget.
    pub fn tick_budget(&self) -> TickBudget {
        TickBudget::new(
            Duration::from_secs(self.tick.external_budget_secs),
            Duration::from_secs(self.tick.timeout_secs),
        )
    }

    /// Advisory lock file serializing writers of the database.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .database_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        self.database_path.with_file_name(name)
    }
}

/// Returns the platform-specific config directory for focuslog.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("focuslog"))
}

/// Returns the platform-specific data directory for focuslog.
///
/// On Linux: `~/.local/share/focuslog`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("focuslog"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_data_path_ends_with_focuslog() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "focuslog");
    }

    #[test]
    fn test_default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("focuslog.db"));
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = Config::default();
        assert_eq!(config.validation_rules(), ValidationRules::default());
        assert_eq!(config.tick_budget(), TickBudget::default());
        assert_eq!(config.tick_interval(), DEFAULT_TICK_INTERVAL);
        assert_eq!(config.cache_ttl(), fl_core::cache::DEFAULT_TTL);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "database_path = \"/tmp/focus.db\"\n\n[detection]\nmin_focus_minutes = 45\n",
        )
        .unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/focus.db"));
        assert_eq!(config.detection.min_focus_minutes, 45);
        assert_eq!(config.detection.dedup_buffer_minutes, 5);
    }

    #[test]
    fn test_lock_path_sits_next_to_database() {
        let config = Config {
            database_path: PathBuf::from("/data/focuslog.db"),
            ..Config::default()
        };
        assert_eq!(config.lock_path(), PathBuf::from("/data/focuslog.db.lock"));
    }
}
