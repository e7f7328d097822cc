//! Vault configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `DOCVAULT_*` environment variables. Later sources win.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use docvault_cache::{CoordinatorConfig, MB};

use crate::settings::{ConversionSettings, PerformanceMode, QualityPreset};

/// Bounds for the number of simultaneous chunk reads
pub const MIN_READ_WINDOW: usize = 1;
pub const MAX_READ_WINDOW: usize = 8;

const ENV_RAM_LIMIT: &str = "DOCVAULT_RAM_LIMIT_MB";
const ENV_SAMPLE_INTERVAL: &str = "DOCVAULT_SAMPLE_INTERVAL_MS";
const ENV_THUMBNAIL_CACHE: &str = "DOCVAULT_THUMBNAIL_CACHE";
const ENV_LARGE_FILE_WARNING: &str = "DOCVAULT_LARGE_FILE_WARNING_MB";
const ENV_READ_WINDOW: &str = "DOCVAULT_READ_WINDOW";
const ENV_QUALITY_PRESET: &str = "DOCVAULT_QUALITY_PRESET";
const ENV_PERFORMANCE_MODE: &str = "DOCVAULT_PERFORMANCE_MODE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Memory ceiling that triggers cleanup
    pub ram_limit_mb: u64,
    /// Period between memory samples
    pub sample_interval_ms: u64,
    /// Wait after cleanup before measuring the result
    pub cleanup_grace_ms: u64,
    /// Entries kept in the thumbnail cache
    pub thumbnail_cache_capacity: usize,
    /// Files above this size ask for confirmation before loading
    pub large_file_warning_mb: u64,
    /// Simultaneous chunk reads while loading
    pub read_window: usize,
    pub quality_preset: QualityPreset,
    pub performance_mode: PerformanceMode,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            ram_limit_mb: 2048,
            sample_interval_ms: 5000,
            cleanup_grace_ms: 100,
            thumbnail_cache_capacity: 64,
            large_file_warning_mb: 500,
            read_window: 3,
            quality_preset: QualityPreset::Standard,
            performance_mode: PerformanceMode::Balanced,
        }
    }
}

impl VaultConfig {
    pub fn with_ram_limit_mb(mut self, mb: u64) -> Self {
        self.ram_limit_mb = mb;
        self
    }

    pub fn with_read_window(mut self, window: usize) -> Self {
        self.read_window = window;
        self
    }

    pub fn with_large_file_warning_mb(mut self, mb: u64) -> Self {
        self.large_file_warning_mb = mb;
        self
    }

    pub fn with_performance_mode(mut self, mode: PerformanceMode) -> Self {
        self.performance_mode = mode;
        self
    }

    /// Default file location, e.g. `~/.config/docvault/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docvault").join("config.toml"))
    }

    /// Defaults, then `path` (or the default location) if it exists, then env
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `DOCVAULT_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_value(ENV_RAM_LIMIT)? {
            self.ram_limit_mb = value;
        }
        if let Some(value) = env_value(ENV_SAMPLE_INTERVAL)? {
            self.sample_interval_ms = value;
        }
        if let Some(value) = env_value(ENV_THUMBNAIL_CACHE)? {
            self.thumbnail_cache_capacity = value;
        }
        if let Some(value) = env_value(ENV_LARGE_FILE_WARNING)? {
            self.large_file_warning_mb = value;
        }
        if let Some(value) = env_value(ENV_READ_WINDOW)? {
            self.read_window = value;
        }
        if let Some(value) = env_value(ENV_QUALITY_PRESET)? {
            self.quality_preset = value;
        }
        if let Some(value) = env_value(ENV_PERFORMANCE_MODE)? {
            self.performance_mode = value;
        }
        self.validate()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write TOML to `path`, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the vault cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ram_limit_mb == 0 || self.ram_limit_mb.checked_mul(MB).is_none() {
            return Err(ConfigError::InvalidValue("ram_limit_mb".to_string()));
        }
        if self.large_file_warning_mb.checked_mul(MB).is_none() {
            return Err(ConfigError::InvalidValue("large_file_warning_mb".to_string()));
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("sample_interval_ms".to_string()));
        }
        Ok(())
    }

    pub fn ram_limit_bytes(&self) -> u64 {
        self.ram_limit_mb.saturating_mul(MB)
    }

    pub fn large_file_warning_bytes(&self) -> u64 {
        self.large_file_warning_mb.saturating_mul(MB)
    }

    /// Read window after clamping and applying the performance mode
    pub fn effective_read_window(&self) -> usize {
        let window = self.read_window.clamp(MIN_READ_WINDOW, MAX_READ_WINDOW);
        match self.performance_mode {
            PerformanceMode::Balanced => window,
            PerformanceMode::LowMemory => MIN_READ_WINDOW,
            PerformanceMode::Throughput => (window + 1).min(MAX_READ_WINDOW),
        }
    }

    pub fn effective_sample_interval(&self) -> Duration {
        let interval = Duration::from_millis(self.sample_interval_ms.max(1));
        match self.performance_mode {
            PerformanceMode::LowMemory => interval / 2,
            _ => interval,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            limit_bytes: self.ram_limit_bytes(),
            sample_interval: self.effective_sample_interval(),
            grace_period: Duration::from_millis(self.cleanup_grace_ms),
        }
    }

    /// Conversion settings for the configured preset
    pub fn default_conversion_settings(&self) -> ConversionSettings {
        self.quality_preset.settings()
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue(key.to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: [&str; 7] = [
        ENV_RAM_LIMIT,
        ENV_SAMPLE_INTERVAL,
        ENV_THUMBNAIL_CACHE,
        ENV_LARGE_FILE_WARNING,
        ENV_READ_WINDOW,
        ENV_QUALITY_PRESET,
        ENV_PERFORMANCE_MODE,
    ];

    // Restores the named variables on drop
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in var_names {
                env::remove_var(name);
            }
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = VaultConfig::default();
        assert_eq!(config.ram_limit_bytes(), 2048 * MB);
        assert_eq!(config.effective_read_window(), 3);
        assert_eq!(config.effective_sample_interval(), Duration::from_secs(5));
        assert_eq!(config.large_file_warning_bytes(), 500 * MB);
    }

    #[test]
    fn test_performance_modes() {
        let low = VaultConfig::default().with_performance_mode(PerformanceMode::LowMemory);
        assert_eq!(low.effective_read_window(), 1);
        assert_eq!(low.effective_sample_interval(), Duration::from_millis(2500));

        let fast = VaultConfig::default().with_performance_mode(PerformanceMode::Throughput);
        assert_eq!(fast.effective_read_window(), 4);

        let capped = fast.with_read_window(50);
        assert_eq!(capped.effective_read_window(), MAX_READ_WINDOW);
        assert_eq!(
            VaultConfig::default().with_read_window(0).effective_read_window(),
            MIN_READ_WINDOW
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_RAM_LIMIT, "512");
        env::set_var(ENV_READ_WINDOW, "5");
        env::set_var(ENV_QUALITY_PRESET, "archival");
        env::set_var(ENV_PERFORMANCE_MODE, "throughput");

        let config = VaultConfig::from_env().unwrap();
        assert_eq!(config.ram_limit_mb, 512);
        assert_eq!(config.read_window, 5);
        assert_eq!(config.quality_preset, QualityPreset::Archival);
        assert_eq!(config.performance_mode, PerformanceMode::Throughput);
        assert_eq!(config.thumbnail_cache_capacity, 64);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_SAMPLE_INTERVAL, "soon");
        match VaultConfig::from_env() {
            Err(ConfigError::InvalidValue(key)) => assert_eq!(key, ENV_SAMPLE_INTERVAL),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_limits_that_overflow_bytes() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_RAM_LIMIT, u64::MAX.to_string());
        match VaultConfig::from_env() {
            Err(ConfigError::InvalidValue(key)) => assert_eq!(key, "ram_limit_mb"),
            other => panic!("unexpected result: {other:?}"),
        }

        env::remove_var(ENV_RAM_LIMIT);
        env::set_var(ENV_LARGE_FILE_WARNING, (u64::MAX / 2).to_string());
        match VaultConfig::from_env() {
            Err(ConfigError::InvalidValue(key)) => assert_eq!(key, "large_file_warning_mb"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_byte_getters_saturate() {
        let config = VaultConfig::default()
            .with_ram_limit_mb(u64::MAX)
            .with_large_file_warning_mb(u64::MAX);
        assert_eq!(config.ram_limit_bytes(), u64::MAX);
        assert_eq!(config.large_file_warning_bytes(), u64::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let _guard = EnvGuard::new(&ALL_VARS);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "ram_limit_mb = 1024\nread_window = 2\n").unwrap();

        env::set_var(ENV_RAM_LIMIT, "256");
        let config = VaultConfig::load(Some(&path)).unwrap();
        assert_eq!(config.ram_limit_mb, 256);
        assert_eq!(config.read_window, 2);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let _guard = EnvGuard::new(&ALL_VARS);
        let dir = tempfile::tempdir().unwrap();

        let config = VaultConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, VaultConfig::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = VaultConfig::from_toml(
            r#"
            # Low-end laptop
            ram_limit_mb = 768
            quality_preset = "draft"
            performance_mode = "low_memory"
        "#,
        )
        .unwrap();
        assert_eq!(config.ram_limit_mb, 768);
        assert_eq!(config.quality_preset, QualityPreset::Draft);
        assert_eq!(config.performance_mode, PerformanceMode::LowMemory);
        assert_eq!(config.sample_interval_ms, 5000);
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(matches!(
            VaultConfig::from_toml("ram_limit_mb = 0"),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            VaultConfig::from_toml("quality_preset = \"ultra\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = VaultConfig::default()
            .with_ram_limit_mb(300)
            .with_large_file_warning_mb(50)
            .with_performance_mode(PerformanceMode::LowMemory);
        config.save_to_file(&path).unwrap();

        let loaded = VaultConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
