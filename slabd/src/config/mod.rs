//! Scheduler configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! scheduler:
//!   target: n00dles
//!   home: home
//!   poll_interval_ms: 1000
//!   rescan_interval_secs: 30
//!   status_interval_secs: 5
//!   call_timeout_secs: 10
//!   home_reserve_gb: 4.10
//!   min_useful_ram_gb: 1.75
//!   exclude_prefixes: ["hacknet-node-"]
//!   hack_fraction: 0.5
//!   money_threshold: 0.75
//!   share_ram_gb: 0
//! autoscale:
//!   enabled: true
//!   reserve: 0
//!   node_prefix: "bought-"
//!   base_ram_gb: 2
//!   max_ram_gb: 1048576
//!   node_limit: 25
//! ```
//!
//! Every field is optional; missing values fall back to the defaults above.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::gate::DEFAULT_CALL_TIMEOUT;
use crate::heap::slab::MAX_ALLOCATION;
use crate::node::{Ram, UsefulnessRule};

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    scheduler: SchedulerSection,
    autoscale: AutoscaleSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SchedulerSection {
    target: String,
    home: String,
    poll_interval_ms: u64,
    rescan_interval_secs: u64,
    status_interval_secs: u64,
    call_timeout_secs: u64,
    home_reserve_gb: f64,
    min_useful_ram_gb: f64,
    exclude_prefixes: Vec<String>,
    hack_fraction: f64,
    money_threshold: f64,
    share_ram_gb: f64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            target: "n00dles".to_string(),
            home: "home".to_string(),
            poll_interval_ms: 1000,
            rescan_interval_secs: 30,
            status_interval_secs: 5,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
            home_reserve_gb: 4.10,
            min_useful_ram_gb: 1.75,
            exclude_prefixes: vec!["hacknet-node-".to_string()],
            hack_fraction: 0.5,
            money_threshold: 0.75,
            share_ram_gb: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AutoscaleSection {
    enabled: bool,
    reserve: f64,
    node_prefix: String,
    base_ram_gb: u64,
    max_ram_gb: u64,
    node_limit: Option<u32>,
}

impl Default for AutoscaleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            reserve: 0.0,
            node_prefix: "bought-".to_string(),
            base_ram_gb: 2,
            max_ram_gb: 1 << 20,
            node_limit: None,
        }
    }
}

// ── Public data structures ────────────────────────────────────────────────────

/// Control-loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Node every task is run against.
    pub target: String,
    /// Fallback node that also hosts the scheduler.
    pub home: String,
    pub poll_interval: Duration,
    pub rescan_interval: Duration,
    pub status_interval: Duration,
    pub call_timeout: Duration,
    pub home_reserve: Ram,
    pub min_useful_ram: Ram,
    pub exclude_prefixes: Vec<String>,
    /// Share of the target's money one hack batch aims to take.
    pub hack_fraction: f64,
    /// Below this money fraction the target is grown instead of hacked.
    pub money_threshold: f64,
    /// RAM handed to share workers at startup, in whole share threads.
    pub share_ram: Ram,
}

impl SchedulerConfig {
    pub fn usefulness(&self) -> UsefulnessRule {
        UsefulnessRule {
            min_ram: self.min_useful_ram,
            exclude_prefixes: self.exclude_prefixes.clone(),
        }
    }
}

/// Purchase/upgrade settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscaleConfig {
    pub enabled: bool,
    /// Funds the policy never spends.
    pub reserve: f64,
    pub node_prefix: String,
    pub base_ram: Ram,
    pub max_ram: Ram,
    /// Lower ceiling than the host's own, if set.
    pub node_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub autoscale: AutoscaleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::convert(ConfigFile::default())
    }
}

impl Config {
    /// Parse and validate `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML, has
    /// unknown keys, or holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading scheduler configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let cfg = Self::from_yaml(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))?;

        debug!(?cfg, "configuration loaded");
        Ok(cfg)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ConfigFile = if content.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse YAML")?
        };
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        file.validate()?;
        Ok(Self::convert(file))
    }

    fn convert(file: ConfigFile) -> Self {
        let s = file.scheduler;
        let a = file.autoscale;

        Self {
            scheduler: SchedulerConfig {
                target: s.target,
                home: s.home,
                poll_interval: Duration::from_millis(s.poll_interval_ms),
                rescan_interval: Duration::from_secs(s.rescan_interval_secs),
                status_interval: Duration::from_secs(s.status_interval_secs),
                call_timeout: Duration::from_secs(s.call_timeout_secs),
                home_reserve: Ram::from_gb(s.home_reserve_gb),
                min_useful_ram: Ram::from_gb(s.min_useful_ram_gb),
                exclude_prefixes: s.exclude_prefixes,
                hack_fraction: s.hack_fraction,
                money_threshold: s.money_threshold,
                share_ram: Ram::from_gb(s.share_ram_gb),
            },
            autoscale: AutoscaleConfig {
                enabled: a.enabled,
                reserve: a.reserve,
                node_prefix: a.node_prefix,
                base_ram: Ram::from_whole_gb(a.base_ram_gb),
                max_ram: Ram::from_whole_gb(a.max_ram_gb),
                node_limit: a.node_limit,
            },
        }
    }
}

impl ConfigFile {
    fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        let a = &self.autoscale;

        if s.target.is_empty() {
            bail!("scheduler.target must not be empty");
        }
        if s.home.is_empty() {
            bail!("scheduler.home must not be empty");
        }
        if s.poll_interval_ms == 0 {
            bail!("scheduler.poll_interval_ms must be positive");
        }
        if s.call_timeout_secs == 0 {
            bail!("scheduler.call_timeout_secs must be positive");
        }
        if !(s.hack_fraction > 0.0 && s.hack_fraction <= 1.0) {
            bail!("scheduler.hack_fraction must be in (0, 1], got {}", s.hack_fraction);
        }
        if !(0.0..=1.0).contains(&s.money_threshold) {
            bail!("scheduler.money_threshold must be in [0, 1], got {}", s.money_threshold);
        }
        if !s.share_ram_gb.is_finite() || s.share_ram_gb < 0.0 {
            bail!("scheduler.share_ram_gb must be a non-negative amount, got {}", s.share_ram_gb);
        }
        if !a.reserve.is_finite() || a.reserve < 0.0 {
            bail!("autoscale.reserve must be a non-negative amount, got {}", a.reserve);
        }
        if a.base_ram_gb == 0 || !a.base_ram_gb.is_power_of_two() {
            bail!("autoscale.base_ram_gb must be a power of two, got {}", a.base_ram_gb);
        }
        if a.node_prefix.is_empty() {
            bail!("autoscale.node_prefix must not be empty");
        }
        if a.max_ram_gb < a.base_ram_gb || Ram::from_whole_gb(a.max_ram_gb) > MAX_ALLOCATION {
            bail!(
                "autoscale.max_ram_gb must be between base_ram_gb and {}, got {}",
                MAX_ALLOCATION,
                a.max_ram_gb
            );
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler.target, "n00dles");
        assert_eq!(cfg.scheduler.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.scheduler.call_timeout, Duration::from_secs(10));
        assert_eq!(cfg.scheduler.home_reserve, Ram::from_centi(410));
        assert_eq!(cfg.scheduler.usefulness().min_ram, Ram::from_centi(175));
        assert_eq!(cfg.autoscale.base_ram, Ram::from_whole_gb(2));
        assert_eq!(cfg.autoscale.max_ram, MAX_ALLOCATION);
        assert_eq!(cfg.autoscale.node_limit, None);
    }

    #[test]
    fn load_full_file() {
        let yaml = r#"
scheduler:
  target: joesguns
  home: base
  poll_interval_ms: 250
  home_reserve_gb: 8
  exclude_prefixes: []
  hack_fraction: 0.25
autoscale:
  enabled: false
  reserve: 1000000
  node_prefix: "farm-"
  base_ram_gb: 8
  max_ram_gb: 1024
  node_limit: 5
"#;
        let f = yaml_tempfile(yaml);
        let cfg = Config::load(f.path()).unwrap();

        assert_eq!(cfg.scheduler.target, "joesguns");
        assert_eq!(cfg.scheduler.home, "base");
        assert_eq!(cfg.scheduler.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.scheduler.home_reserve, Ram::from_whole_gb(8));
        assert!(cfg.scheduler.exclude_prefixes.is_empty());
        assert_eq!(cfg.scheduler.hack_fraction, 0.25);
        // Unset keys keep their defaults.
        assert_eq!(cfg.scheduler.money_threshold, 0.75);

        assert!(!cfg.autoscale.enabled);
        assert_eq!(cfg.autoscale.reserve, 1_000_000.0);
        assert_eq!(cfg.autoscale.node_prefix, "farm-");
        assert_eq!(cfg.autoscale.max_ram, Ram::from_whole_gb(1024));
        assert_eq!(cfg.autoscale.node_limit, Some(5));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let f = yaml_tempfile("");
        assert_eq!(Config::load(f.path()).unwrap(), Config::default());
    }

    #[test]
    fn missing_file_returns_error() {
        assert!(Config::load(Path::new("/nonexistent/path/slabd.yaml")).is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(Config::load(f.path()).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_yaml("scheduler:\n  targte: n00dles\n").unwrap_err();
        assert!(format!("{err:#}").contains("targte"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(Config::from_yaml("scheduler:\n  hack_fraction: 0\n").is_err());
        assert!(Config::from_yaml("scheduler:\n  money_threshold: 1.5\n").is_err());
        assert!(Config::from_yaml("autoscale:\n  base_ram_gb: 3\n").is_err());
        assert!(Config::from_yaml("autoscale:\n  max_ram_gb: 2097152\n").is_err());
        assert!(Config::from_yaml("autoscale:\n  reserve: -1\n").is_err());
        assert!(Config::from_yaml("scheduler:\n  share_ram_gb: -4\n").is_err());
    }

    #[test]
    fn share_ram_defaults_off_and_parses_gb() {
        assert!(Config::default().scheduler.share_ram.is_zero());
        let cfg = Config::from_yaml("scheduler:\n  share_ram_gb: 12.5\n").unwrap();
        assert_eq!(cfg.scheduler.share_ram, Ram::from_centi(1250));
    }
}
