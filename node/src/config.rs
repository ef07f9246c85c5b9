//! # Node Configuration
//!
//! TOML file layout for `strata-node run`. Every section is optional and
//! falls back to its defaults; CLI flags are applied last.
//!
//! ```toml
//! validators = 4
//! stake = 100
//! heights = 20
//!
//! [timing]
//! parent_mining_time = 1
//! pos_out_time = 2
//! reelect_out_time = 2
//! reelect_handle_interval = 1
//!
//! [verifier]
//! txs_fetch_timeout_ms = 2000
//!
//! [metrics]
//! listen_addr = "127.0.0.1:9742"
//! ```

use std::fs;
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use strata_protocol::config::VerifierConfig;
use strata_protocol::consensus::LeaderTimeConfig;

use crate::cli::RunArgs;
use crate::logging::{Component, LogFormat};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub validators: usize,
    /// Stake of every validator.
    pub stake: u64,
    /// Finalized heights to run for. 0 runs until interrupted.
    pub heights: u64,
    /// Validators that are never started.
    pub offline: Vec<usize>,
    /// Demo transfers submitted before the first height.
    pub transfers: u64,
    pub timing: LeaderTimeConfig,
    pub verifier: VerifierConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            stake: 100,
            heights: 0,
            offline: Vec::new(),
            transfers: 10,
            timing: LeaderTimeConfig {
                parent_mining_time: 1,
                pos_out_time: 2,
                reelect_out_time: 2,
                reelect_handle_interval: 1,
            },
            verifier: VerifierConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9742".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level of every strata component when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Per-component levels, e.g. `verifier = "debug"`.
    pub components: BTreeMap<Component, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            components: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// File configuration (or defaults) with CLI overrides applied.
    pub fn resolve(args: &RunArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(validators) = args.validators {
            self.validators = validators;
        }
        if let Some(heights) = args.heights {
            self.heights = heights;
        }
        if let Some(addr) = &args.metrics_addr {
            self.metrics.listen_addr = addr.clone();
        }
        if !args.offline.is_empty() {
            self.offline = args.offline.clone();
        }
        if let Some(transfers) = args.transfers {
            self.transfers = transfers;
        }
        if let Some(format) = &args.log_format {
            self.logging.format = LogFormat::from_str_lossy(format);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.validators == 0 {
            bail!("at least one validator is required");
        }
        if self.stake == 0 {
            bail!("validator stake must be positive");
        }
        if let Some(index) = self.offline.iter().find(|i| **i >= self.validators) {
            bail!("offline validator {index} out of range (validators = {})", self.validators);
        }
        let online = self.validators - self.offline.len().min(self.validators);
        if online * 3 <= self.validators * 2 {
            bail!(
                "{online} of {} validators online cannot reach a two-thirds quorum",
                self.validators
            );
        }
        self.timing
            .validate()
            .context("invalid [timing] section")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn defaults_are_valid() {
        NodeConfig::default().validate().expect("valid defaults");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            r#"
validators = 7
heights = 12

[metrics]
listen_addr = "0.0.0.0:9100"
"#,
        );
        let config = NodeConfig::load(file.path()).expect("load");
        assert_eq!(config.validators, 7);
        assert_eq!(config.heights, 12);
        assert_eq!(config.metrics.listen_addr, "0.0.0.0:9100");
        assert!(config.metrics.enabled);
        assert_eq!(config.stake, 100);
        assert_eq!(config.verifier, VerifierConfig::default());
    }

    #[test]
    fn timing_and_verifier_sections() {
        let file = write_config(
            r#"
[timing]
parent_mining_time = 3
pos_out_time = 4
reelect_out_time = 5
reelect_handle_interval = 2

[verifier]
txs_fetch_timeout_ms = 250
"#,
        );
        let config = NodeConfig::load(file.path()).expect("load");
        assert_eq!(config.timing.pos_out_time, 4);
        assert_eq!(config.verifier.txs_fetch_timeout_ms, 250);
        assert_eq!(
            config.verifier.vote_resend,
            VerifierConfig::default().vote_resend
        );
    }

    #[test]
    fn logging_component_levels() {
        let file = write_config(
            r#"
[logging]
level = "warn"

[logging.components]
verifier = "debug"
devnet = "trace"
"#,
        );
        let config = NodeConfig::load(file.path()).expect("load");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(
            config.logging.components.get(&Component::Verifier).map(String::as_str),
            Some("debug")
        );
        assert!(!config.logging.components.contains_key(&Component::Schedule));
    }

    #[test]
    fn cli_overrides_file() {
        let file = write_config("validators = 7\ntransfers = 3\n");
        let args = RunArgs {
            config: Some(file.path().to_path_buf()),
            validators: Some(10),
            offline: vec![2],
            log_format: Some("json".into()),
            ..RunArgs::default()
        };
        let config = NodeConfig::resolve(&args).expect("resolve");
        assert_eq!(config.validators, 10);
        assert_eq!(config.transfers, 3);
        assert_eq!(config.offline, vec![2]);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn rejects_unreachable_quorum() {
        let config = NodeConfig {
            validators: 4,
            offline: vec![0, 1],
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());

        let config = NodeConfig {
            offline: vec![9],
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_timing_and_missing_file() {
        let mut config = NodeConfig::default();
        config.timing.pos_out_time = 0;
        assert!(config.validate().is_err());
        assert!(NodeConfig::load(Path::new("/nonexistent/strata.toml")).is_err());
    }
}
