//! Controller configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `ADR_`-prefixed environment variables, then command-line flags. Nested
//! keys use a double underscore in the environment, e.g.
//! `ADR_STRATEGY__GAMMA=0.2` or `ADR_REWARD__BETA=1.0`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use adr_core::catalog::{DEFAULT_SPREADING_FACTORS, DEFAULT_TX_POWERS_DBM};
use adr_core::{ActionCatalog, PolicyEngine, RewardWeights, StrategyConfig};

use crate::error::{ControllerError, Result};

pub const ENV_PREFIX: &str = "ADR_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Address the environment connects to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_spreading_factors")]
    pub spreading_factors: Vec<u8>,

    #[serde(default = "default_tx_powers")]
    pub tx_powers_dbm: Vec<i8>,

    /// Expected number of arms; must match the catalog when set
    #[serde(default)]
    pub arms: Option<usize>,

    /// Per-request deadline before the fallback action is sent
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_devices")]
    pub max_devices: usize,

    /// Recent reward samples kept for diagnostics
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// Period of the status log line; 0 disables it
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub reward: RewardWeights,

    #[serde(default)]
    pub strategy: StrategyConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7654".to_string()
}

fn default_spreading_factors() -> Vec<u8> {
    DEFAULT_SPREADING_FACTORS.to_vec()
}

fn default_tx_powers() -> Vec<i8> {
    DEFAULT_TX_POWERS_DBM.to_vec()
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_max_devices() -> usize {
    4096
}

fn default_history_len() -> usize {
    256
}

fn default_status_interval_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            spreading_factors: default_spreading_factors(),
            tx_powers_dbm: default_tx_powers(),
            arms: None,
            timeout_ms: default_timeout_ms(),
            max_devices: default_max_devices(),
            history_len: default_history_len(),
            status_interval_secs: default_status_interval_secs(),
            seed: None,
            log_level: default_log_level(),
            reward: RewardWeights::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the action catalog, checking it against the configured arm count.
    pub fn catalog(&self) -> Result<ActionCatalog> {
        let catalog = ActionCatalog::new(self.spreading_factors.clone(), self.tx_powers_dbm.clone())
            .map_err(|e| ControllerError::Startup(e.to_string()))?;
        if let Some(arms) = self.arms {
            if arms != catalog.len() {
                return Err(ControllerError::Startup(format!(
                    "configured {} arms but {} spreading factors x {} powers give {}",
                    arms,
                    self.spreading_factors.len(),
                    self.tx_powers_dbm.len(),
                    catalog.len()
                )));
            }
        }
        Ok(catalog)
    }

    /// Check everything that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        let catalog = self.catalog()?;
        self.reward
            .validate()
            .map_err(|e| ControllerError::Startup(e.to_string()))?;
        if self.timeout_ms == 0 {
            return Err(ControllerError::Startup("timeout_ms must be positive".into()));
        }
        if self.max_devices == 0 {
            return Err(ControllerError::Startup("max_devices must be positive".into()));
        }
        PolicyEngine::new(catalog.len(), &self.strategy, &self.reward, self.seed)
            .map_err(|e| ControllerError::Startup(e.to_string()))?;
        Ok(())
    }
}

/// Command-line overrides, applied on top of file and environment.
#[derive(Debug, Clone, Default, Args)]
pub struct ControllerArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Expected number of arms
    #[arg(long)]
    pub arms: Option<usize>,

    /// Learning strategy: exp3 or epsilon-greedy
    #[arg(long)]
    pub strategy: Option<String>,

    /// Exp3 exploration rate
    #[arg(long)]
    pub gamma: Option<f64>,

    /// Epsilon-greedy exploration rate
    #[arg(long)]
    pub epsilon: Option<f64>,

    /// Weight on the delivery ratio
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Weight on normalized energy
    #[arg(long)]
    pub beta: Option<f64>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long)]
    pub max_devices: Option<usize>,

    /// RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log filter, e.g. "debug" or "adrd=trace"
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Collects configuration sources in precedence order.
pub struct ConfigLoader {
    figment: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(ControllerConfig::default())),
        }
    }

    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.figment = self.figment.merge(Toml::file(path.as_ref()));
        self
    }

    /// `ADR_LOG` is read by the log setup, not here.
    pub fn env(mut self) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["log"]).split("__"));
        self
    }

    pub fn with_args(mut self, args: &ControllerArgs) -> Self {
        fn set<T: Serialize + Clone>(figment: Figment, key: &str, value: &Option<T>) -> Figment {
            match value {
                Some(v) => figment.merge(Serialized::default(key, v.clone())),
                None => figment,
            }
        }

        let mut f = self.figment;
        f = set(f, "listen_addr", &args.listen);
        f = set(f, "arms", &args.arms);
        f = set(f, "strategy.kind", &args.strategy);
        f = set(f, "strategy.gamma", &args.gamma);
        f = set(f, "strategy.epsilon", &args.epsilon);
        f = set(f, "reward.alpha", &args.alpha);
        f = set(f, "reward.beta", &args.beta);
        f = set(f, "timeout_ms", &args.timeout_ms);
        f = set(f, "max_devices", &args.max_devices);
        f = set(f, "seed", &args.seed);
        f = set(f, "log_level", &args.log_level);
        self.figment = f;
        self
    }

    pub fn extract(self) -> Result<ControllerConfig> {
        let config: ControllerConfig = self.figment.extract().map_err(Box::new)?;
        Ok(config)
    }
}

/// Full precedence chain for the daemon: defaults, file, env, CLI.
pub fn load(args: &ControllerArgs) -> Result<ControllerConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        if !path.exists() {
            return Err(ControllerError::Startup(format!(
                "config file {} not found",
                path.display()
            )));
        }
        loader = loader.file(path);
    }
    let config = loader.env().with_args(args).extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adr_core::EpsilonGreedyConfig;

    #[test]
    fn test_defaults() {
        let config = ConfigLoader::new().extract().unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.catalog().unwrap().len(), 30);
        assert_eq!(config.max_devices, 4096);
        assert_eq!(config.history_len, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("adrd-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            listen_addr = "0.0.0.0:9000"
            timeout_ms = 40
            spreading_factors = [7, 8]
            tx_powers_dbm = [2, 14]

            [reward]
            alpha = 2.0
            beta = 1.0
            energy_reference_j = 0.1

            [strategy]
            kind = "epsilon-greedy"
            epsilon = 0.05
            "#,
        )
        .unwrap();

        let config = ConfigLoader::new().file(&path).extract().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.timeout(), Duration::from_millis(40));
        assert_eq!(config.catalog().unwrap().len(), 4);
        assert_eq!(config.reward.alpha, 2.0);
        assert_eq!(
            config.strategy,
            StrategyConfig::EpsilonGreedy(EpsilonGreedyConfig {
                epsilon: 0.05,
                step_size: None
            })
        );
        // untouched keys keep defaults
        assert_eq!(config.max_devices, 4096);
    }

    #[test]
    fn test_cli_args_win() {
        let args = ControllerArgs {
            listen: Some("127.0.0.1:1".into()),
            gamma: Some(0.3),
            beta: Some(0.25),
            timeout_ms: Some(10),
            seed: Some(5),
            ..Default::default()
        };
        let config = ConfigLoader::new().with_args(&args).extract().unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:1");
        assert_eq!(config.reward.beta, 0.25);
        assert_eq!(config.reward.alpha, 1.0);
        assert_eq!(config.seed, Some(5));
        match config.strategy {
            StrategyConfig::Exp3(c) => assert_eq!(c.gamma, 0.3),
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_cli_can_switch_strategy() {
        let args = ControllerArgs {
            strategy: Some("epsilon-greedy".into()),
            epsilon: Some(0.2),
            ..Default::default()
        };
        let config = ConfigLoader::new().with_args(&args).extract().unwrap();
        assert_eq!(config.strategy.name(), "epsilon-greedy");
    }

    #[test]
    fn test_arm_count_mismatch_is_startup_error() {
        let config = ControllerConfig {
            arms: Some(12),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ControllerError::Startup(_))));

        let ok = ControllerConfig {
            arms: Some(30),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_timeout = ControllerConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let empty_catalog = ControllerConfig {
            spreading_factors: vec![],
            ..Default::default()
        };
        assert!(empty_catalog.validate().is_err());

        let bad_gamma = ControllerConfig {
            strategy: StrategyConfig::Exp3(adr_core::Exp3Config {
                gamma: 0.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(bad_gamma.validate().is_err());
    }

    #[test]
    fn test_missing_config_file_is_startup_error() {
        let args = ControllerArgs {
            config: Some(PathBuf::from("/definitely/not/here/adrd.toml")),
            ..Default::default()
        };
        assert!(matches!(load(&args), Err(ControllerError::Startup(_))));
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&ControllerConfig::default()).unwrap();
        assert!(text.contains("listen_addr"));
        assert!(text.contains("[strategy]"));
    }
}
