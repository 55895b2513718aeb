//! Configuration management with validation and defaults
//!
//! Network presets, TOML loading and environment variable overrides.

use crate::errors::{ConfigurationError, RaffleResult};
use crate::types::{amount_serde, Address, Amount};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// 0.01 ether, the entrance fee used by both presets
pub const DEFAULT_ENTRANCE_FEE: Amount = 10_000_000_000_000_000;

/// Random words requested per draw
pub const NUM_WORDS: u32 = 1;

const MAX_REQUEST_CONFIRMATIONS: u16 = 200;

/// Complete raffle configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RaffleConfig {
    pub raffle: RaffleParams,
    pub oracle: OracleConfig,
    pub keeper: KeeperConfig,
    pub logging: LoggingConfig,
}

/// Round parameters; constant for the raffle's lifetime
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RaffleParams {
    pub chain_id: u64,
    #[serde(with = "amount_serde")]
    pub entrance_fee: Amount,
    /// Minimum seconds between the round opening and a draw
    pub interval_secs: u64,
}

impl Default for RaffleParams {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            entrance_fee: DEFAULT_ENTRANCE_FEE,
            interval_secs: 30,
        }
    }
}

/// Randomness oracle request parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// Identity allowed to deliver fulfillments
    pub coordinator: Address,
    /// Gas lane selecting the oracle's price tier
    pub key_hash: String,
    pub subscription_id: u64,
    pub request_confirmations: u16,
    pub callback_gas_limit: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            coordinator: Address::repeat_byte(0x0c),
            key_hash: "0x474e34a077df58807dbe9c96d3c009b23b3c6d0cce433e59bbf5b34f823bc56c".to_string(),
            subscription_id: 1,
            request_confirmations: 3,
            callback_gas_limit: 500_000,
        }
    }
}

/// Keeper runtime timing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeeperConfig {
    pub poll_interval_ms: u64,
    /// How long the local VRF coordinator waits before fulfilling
    pub fulfillment_delay_ms: u64,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            fulfillment_delay_ms: 500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ConfigurationError::InvalidValue {
                field: "logging.level".to_string(),
                value: s.to_string(),
                reason: "expected error|warn|info|debug|trace".to_string(),
            }),
        }
    }
}

impl RaffleConfig {
    /// Local development chain
    pub fn local() -> Self {
        Self::default()
    }

    /// Sepolia testnet
    pub fn sepolia() -> Self {
        Self {
            raffle: RaffleParams {
                chain_id: 11155111,
                entrance_fee: DEFAULT_ENTRANCE_FEE,
                interval_secs: 30,
            },
            oracle: OracleConfig {
                coordinator: Address::new([
                    0x81, 0x03, 0xb0, 0xa8, 0xa0, 0x0b, 0xe2, 0xdd, 0xc7, 0x78, 0xe6, 0xe7, 0xea,
                    0xa2, 0x17, 0x91, 0xcd, 0x36, 0x46, 0x25,
                ]),
                ..OracleConfig::default()
            },
            keeper: KeeperConfig {
                poll_interval_ms: 15_000,
                fulfillment_delay_ms: 36_000,
            },
            ..Default::default()
        }
    }

    /// Look up a preset by network name
    pub fn for_network(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            "local" | "localhost" | "hardhat" => Ok(Self::local()),
            "sepolia" => Ok(Self::sepolia()),
            other => Err(ConfigurationError::UnknownNetwork(other.to_string())),
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.raffle.entrance_fee == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "entrance_fee must be > 0".to_string(),
            ));
        }

        if self.oracle.callback_gas_limit == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "callback_gas_limit must be > 0".to_string(),
            ));
        }

        if self.oracle.request_confirmations == 0
            || self.oracle.request_confirmations > MAX_REQUEST_CONFIRMATIONS
        {
            return Err(ConfigurationError::ValidationFailed(format!(
                "request_confirmations must be in 1..={}",
                MAX_REQUEST_CONFIRMATIONS
            )));
        }

        if self.keeper.poll_interval_ms == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.keeper.poll_interval_ms)
    }

    pub fn fulfillment_delay(&self) -> Duration {
        Duration::from_millis(self.keeper.fulfillment_delay_ms)
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    base: Option<RaffleConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Start from a preset instead of the defaults when no file is given
    pub fn with_base(mut self, base: RaffleConfig) -> Self {
        self.base = Some(base);
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> RaffleResult<RaffleConfig> {
        let mut config = match (&self.config_path, &self.base) {
            (Some(path), _) => self.load_from_file(path)?,
            (None, Some(base)) => base.clone(),
            (None, None) => RaffleConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<RaffleConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut RaffleConfig) -> Result<(), ConfigurationError> {
        if let Ok(fee) = env::var("RAFFLE_ENTRANCE_FEE") {
            config.raffle.entrance_fee = parse_env("RAFFLE_ENTRANCE_FEE", fee)?;
        }
        if let Ok(interval) = env::var("RAFFLE_INTERVAL_SECS") {
            config.raffle.interval_secs = parse_env("RAFFLE_INTERVAL_SECS", interval)?;
        }
        if let Ok(sub) = env::var("RAFFLE_SUBSCRIPTION_ID") {
            config.oracle.subscription_id = parse_env("RAFFLE_SUBSCRIPTION_ID", sub)?;
        }
        if let Ok(limit) = env::var("RAFFLE_CALLBACK_GAS_LIMIT") {
            config.oracle.callback_gas_limit = parse_env("RAFFLE_CALLBACK_GAS_LIMIT", limit)?;
        }
        if let Ok(level) = env::var("RAFFLE_LOG_LEVEL") {
            config.logging.level = level.parse()?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String) -> Result<T, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigurationError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RaffleConfig::default().validate().is_ok());
        assert!(RaffleConfig::sepolia().validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let local = RaffleConfig::for_network("hardhat").unwrap();
        assert_eq!(local.raffle.chain_id, 31337);
        assert_eq!(local.raffle.entrance_fee, DEFAULT_ENTRANCE_FEE);

        let sepolia = RaffleConfig::for_network("sepolia").unwrap();
        assert_eq!(sepolia.raffle.chain_id, 11155111);
        assert_eq!(
            sepolia.oracle.coordinator.to_string(),
            "0x8103b0a8a00be2ddc778e6e7eaa21791cd364625"
        );

        assert!(matches!(
            RaffleConfig::for_network("mainnet"),
            Err(ConfigurationError::UnknownNetwork(_))
        ));
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = RaffleConfig::default();
        config.raffle.entrance_fee = 0;
        assert!(config.validate().is_err());

        let mut config = RaffleConfig::default();
        config.oracle.request_confirmations = 201;
        assert!(config.validate().is_err());

        let mut config = RaffleConfig::default();
        config.keeper.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[raffle]
entrance_fee = "250000000000000000000"
interval_secs = 60

[oracle]
coordinator = "0x0101010101010101010101010101010101010101"
subscription_id = 42

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = ConfigLoader::new().with_path(file.path()).load().unwrap();
        assert_eq!(config.raffle.entrance_fee, 250_000_000_000_000_000_000);
        assert_eq!(config.raffle.interval_secs, 60);
        assert_eq!(config.raffle.chain_id, 31337);
        assert_eq!(config.oracle.coordinator, Address::repeat_byte(1));
        assert_eq!(config.oracle.subscription_id, 42);
        assert_eq!(config.oracle.callback_gas_limit, 500_000);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_integer_entrance_fee_accepted() {
        let config: RaffleConfig = toml::from_str("[raffle]\nentrance_fee = 100\n").unwrap();
        assert_eq!(config.raffle.entrance_fee, 100);
    }

    #[test]
    fn test_missing_file_fails() {
        let result = ConfigLoader::new().with_path("/nonexistent/raffle.toml").load();
        assert!(matches!(
            result,
            Err(crate::errors::RaffleError::Configuration(ConfigurationError::LoadFailed(_)))
        ));
    }

    #[test]
    fn test_duration_conversions() {
        let config = RaffleConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(1_000));
        assert_eq!(config.fulfillment_delay(), Duration::from_millis(500));
    }
}
