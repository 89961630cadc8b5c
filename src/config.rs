//! Configuration for the ipmi_fand daemon.
//!
//! Handles locating, parsing and validating the YAML configuration file
//! that defines the speed table, the management commands and logging.
//! Configuration is read once at startup and never reloaded.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    drivers::ipmitool::SPEED_PLACEHOLDER,
    sensors::{ReadingParser, UnavailablePolicy},
    speed_table::{self, SpeedRange, SpeedTable},
};

/// Environment variable pointing at a configuration file.
pub const CONFIG_ENV: &str = "IPMI_FAND_CONFIG";

/// Main configuration structure.
///
/// Every field has a default, so an empty document (or no file at all)
/// yields the stock HR650X behaviour.
///
/// # Example
///
/// ```yaml
/// version: 1
/// tick_seconds: 5
/// command_timeout_seconds: 10
///
/// sensor:
///   program: ipmitool
///   args: ["sensor"]
///   filters: ["CPU", "Temp"]
///   marker: "Temp"
///   unavailable: treat-as-zero
///
/// actuator:
///   program: ipmitool
///   args: ["raw", "0x2e", "0x30", "00", "00", "{speed}"]
///
/// logging:
///   target: file
///   path: ipmi_fan.log
///   level: info
///   console: true
///
/// speed_table:
///   - { min_temp: 0, max_temp: 40, speed: 10 }
///   - { min_temp: 40, max_temp: 60, speed: 50 }
///   - { min_temp: 60, max_temp: 80, speed: 80 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    #[serde(default = "defaults::version")]
    pub version: u8,

    /// Delay between control ticks in seconds.
    #[serde(default = "defaults::tick_seconds")]
    pub tick_seconds: u16,

    /// Upper bound for a single management command in seconds.
    #[serde(default = "defaults::command_timeout_seconds")]
    pub command_timeout_seconds: u16,

    #[serde(default)]
    pub sensor: SensorCfg,

    #[serde(default)]
    pub actuator: ActuatorCfg,

    #[serde(default)]
    pub logging: LogCfg,

    /// Ordered temperature ranges and their fan speeds.
    #[serde(default = "speed_table::default_ranges")]
    pub speed_table: Vec<SpeedRange>,
}

/// An external program and its arguments. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCfg {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Sensor query and parsing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCfg {
    #[serde(default = "defaults::sensor_program")]
    pub program: String,

    #[serde(default = "defaults::sensor_args")]
    pub args: Vec<String>,

    /// Tokens that must all appear in a line for it to be read.
    #[serde(default = "defaults::filters")]
    pub filters: Vec<String>,

    /// Token identifying a temperature record.
    #[serde(default = "defaults::marker")]
    pub marker: String,

    /// Handling of sensors reported as `na`.
    #[serde(default)]
    pub unavailable: UnavailablePolicy,
}

/// Set-speed command. `{speed}` in any argument is replaced by the duty cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorCfg {
    #[serde(default = "defaults::actuator_program")]
    pub program: String,

    #[serde(default = "defaults::actuator_args")]
    pub args: Vec<String>,
}

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogTarget {
    /// Append-only file, optionally mirrored to stdout.
    #[default]
    File,
    /// Stdout only.
    Console,
    /// Local syslog daemon.
    Syslog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogCfg {
    #[serde(default)]
    pub target: LogTarget,

    /// Log file for the `file` target.
    #[serde(default = "defaults::log_path")]
    pub path: PathBuf,

    /// One of `error`, `warn`, `info`, `debug`, `trace`, `off`.
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Mirror file records to stdout.
    #[serde(default = "defaults::console")]
    pub console: bool,
}

mod defaults {
    use std::path::PathBuf;

    pub fn version() -> u8 {
        1
    }

    pub fn tick_seconds() -> u16 {
        5
    }

    pub fn command_timeout_seconds() -> u16 {
        10
    }

    pub fn filters() -> Vec<String> {
        vec!["CPU".into(), "Temp".into()]
    }

    pub fn marker() -> String {
        "Temp".into()
    }

    pub fn sensor_program() -> String {
        "ipmitool".into()
    }

    pub fn sensor_args() -> Vec<String> {
        vec!["sensor".into()]
    }

    pub fn actuator_program() -> String {
        "ipmitool".into()
    }

    pub fn actuator_args() -> Vec<String> {
        ["raw", "0x2e", "0x30", "00", "00", "{speed}"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub fn log_path() -> PathBuf {
        PathBuf::from("ipmi_fan.log")
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn console() -> bool {
        true
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: defaults::version(),
            tick_seconds: defaults::tick_seconds(),
            command_timeout_seconds: defaults::command_timeout_seconds(),
            sensor: SensorCfg::default(),
            actuator: ActuatorCfg::default(),
            logging: LogCfg::default(),
            speed_table: speed_table::default_ranges(),
        }
    }
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            program: defaults::sensor_program(),
            args: defaults::sensor_args(),
            filters: defaults::filters(),
            marker: defaults::marker(),
            unavailable: UnavailablePolicy::default(),
        }
    }
}

impl Default for ActuatorCfg {
    fn default() -> Self {
        Self {
            program: defaults::actuator_program(),
            args: defaults::actuator_args(),
        }
    }
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            target: LogTarget::default(),
            path: defaults::log_path(),
            level: defaults::log_level(),
            console: defaults::console(),
        }
    }
}

impl SensorCfg {
    pub fn command(&self) -> CommandCfg {
        CommandCfg {
            program: self.program.clone(),
            args: self.args.clone(),
        }
    }

    pub fn parser(&self) -> ReadingParser {
        ReadingParser {
            filters: self.filters.clone(),
            marker: self.marker.clone(),
            unavailable: self.unavailable,
        }
    }
}

impl ActuatorCfg {
    pub fn command(&self) -> CommandCfg {
        CommandCfg {
            program: self.program.clone(),
            args: self.args.clone(),
        }
    }
}

impl LogCfg {
    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        self.level
            .parse()
            .with_context(|| format!("Unknown log level '{}'", self.level))
    }
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.tick_seconds))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.command_timeout_seconds))
    }

    /// Builds the validated speed table.
    pub fn speed_table(&self) -> Result<SpeedTable> {
        SpeedTable::new(self.speed_table.clone()).context("Invalid speed table")
    }

    /// Validates the configuration for consistency.
    ///
    /// A configuration that fails here must never drive the fans: an
    /// incorrect table risks under-cooling the hardware.
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            anyhow::bail!("Unsupported config version {}", self.version);
        }
        if self.tick_seconds == 0 {
            anyhow::bail!("tick_seconds must be greater than zero");
        }
        if self.command_timeout_seconds == 0 {
            anyhow::bail!("command_timeout_seconds must be greater than zero");
        }
        if self.sensor.program.trim().is_empty() {
            anyhow::bail!("sensor.program cannot be empty");
        }
        if self.actuator.program.trim().is_empty() {
            anyhow::bail!("actuator.program cannot be empty");
        }
        if !self
            .actuator
            .args
            .iter()
            .any(|arg| arg.contains(SPEED_PLACEHOLDER))
        {
            anyhow::bail!("actuator.args must contain the {SPEED_PLACEHOLDER} placeholder");
        }
        if self.sensor.marker.is_empty() {
            anyhow::bail!("sensor.marker cannot be empty");
        }
        self.logging.level_filter()?;
        self.speed_table()?;
        Ok(())
    }

    /// Loads the configuration from `path` or the standard locations.
    ///
    /// Searches in the following order:
    /// 1. Provided path parameter
    /// 2. `IPMI_FAND_CONFIG` environment variable
    /// 3. `$XDG_CONFIG_HOME/ipmi_fand/config.yml` or `~/.config/ipmi_fand/config.yml`
    /// 4. `/etc/ipmi_fand/config.yml`
    ///
    /// Falls back to [`Config::default`] when nothing is found. Returns the
    /// path that was read, if any.
    pub fn load(path: Option<PathBuf>) -> Result<(Self, Option<PathBuf>)> {
        let Some(config_path) = path.or_else(locate_config) else {
            let config = Self::default();
            config.validate()?;
            return Ok((config, None));
        };

        let config = Self::load_from_path(&config_path)?;
        Ok((config, Some(config_path)))
    }

    /// Loads and validates configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}

fn locate_config() -> Option<PathBuf> {
    if let Some(env_path) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("ipmi_fand/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/ipmi_fand/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}
