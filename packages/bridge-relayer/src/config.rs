use bridge_core::{AppId, AppRoutes, AssetClass, BlockNumber, EvmAddress};
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub substrate: SubstrateConfig,
    pub evm: EvmConfig,
    pub apps: AppsConfig,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
}

/// Substrate source configuration
#[derive(Debug, Clone)]
pub struct SubstrateConfig {
    pub rpc_url: String,
    /// First block to relay; the finalized head when unset
    pub start_block: Option<BlockNumber>,
}

/// EVM source and destination configuration
#[derive(Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub finality_blocks: u64,
    /// First block to relay; the finalized head when unset
    pub start_block: Option<BlockNumber>,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for EvmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("finality_blocks", &self.finality_blocks)
            .field("start_block", &self.start_block)
            .finish()
    }
}

/// Destination application contracts, one per asset class
#[derive(Debug, Clone)]
pub struct AppsConfig {
    pub eth_app: String,
    pub erc20_app: String,
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub retry_interval_ms: u64,
    pub channel_capacity: usize,
    pub event_bus_capacity: usize,
    /// Longest wait for a release receipt
    pub release_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Default functions
fn default_finality_blocks() -> u64 {
    12
}

fn default_retry_interval() -> u64 {
    10_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_release_timeout() -> u64 {
    120_000
}

fn default_api_port() -> u16 {
    9090
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| eyre!("{} environment variable is required", key))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let substrate = SubstrateConfig {
            rpc_url: required("SUBSTRATE_RPC_URL")?,
            start_block: parse_optional(optional("SUBSTRATE_START_BLOCK"), "SUBSTRATE_START_BLOCK")?,
        };

        let evm = EvmConfig {
            rpc_url: required("EVM_RPC_URL")?,
            private_key: required("EVM_PRIVATE_KEY")?,
            finality_blocks: parse_optional(optional("EVM_FINALITY_BLOCKS"), "EVM_FINALITY_BLOCKS")?
                .unwrap_or(default_finality_blocks()),
            start_block: parse_optional(optional("EVM_START_BLOCK"), "EVM_START_BLOCK")?,
        };

        let apps = AppsConfig {
            eth_app: required("ETH_APP_ADDRESS")?,
            erc20_app: required("ERC20_APP_ADDRESS")?,
        };

        let relayer = RelayerConfig {
            retry_interval_ms: parse_optional(optional("RETRY_INTERVAL_MS"), "RETRY_INTERVAL_MS")?
                .unwrap_or(default_retry_interval()),
            channel_capacity: parse_optional(optional("CHANNEL_CAPACITY"), "CHANNEL_CAPACITY")?
                .unwrap_or(default_channel_capacity()),
            event_bus_capacity: parse_optional(
                optional("EVENT_BUS_CAPACITY"),
                "EVENT_BUS_CAPACITY",
            )?
            .unwrap_or(default_event_bus_capacity()),
            release_timeout_ms: parse_optional(
                optional("RELEASE_TIMEOUT_MS"),
                "RELEASE_TIMEOUT_MS",
            )?
            .unwrap_or(default_release_timeout()),
        };

        let api = ApiConfig {
            bind_address: optional("API_BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_optional(optional("API_PORT"), "API_PORT")?.unwrap_or(default_api_port()),
        };

        let config = Config {
            substrate,
            evm,
            apps,
            relayer,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("SUBSTRATE_RPC_URL", &self.substrate.rpc_url),
            ("EVM_RPC_URL", &self.evm.rpc_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(eyre!("{} must be an http(s) URL", name));
            }
        }

        // Validate EVM private key
        let key = self.evm.private_key.trim_start_matches("0x");
        if key.len() != 64 || hex::decode(key).is_err() {
            return Err(eyre!("EVM_PRIVATE_KEY must be 32 bytes of hex (64 chars, optional 0x)"));
        }

        // Validate app addresses and routing
        self.routes()?;

        if self.relayer.retry_interval_ms == 0 {
            return Err(eyre!("RETRY_INTERVAL_MS must be greater than zero"));
        }
        if self.relayer.channel_capacity == 0 {
            return Err(eyre!("CHANNEL_CAPACITY must be greater than zero"));
        }
        if self.relayer.event_bus_capacity == 0 {
            return Err(eyre!("EVENT_BUS_CAPACITY must be greater than zero"));
        }
        if self.relayer.release_timeout_ms == 0 {
            return Err(eyre!("RELEASE_TIMEOUT_MS must be greater than zero"));
        }

        Ok(())
    }

    /// Routing table built from the app addresses
    pub fn routes(&self) -> Result<AppRoutes> {
        let eth = EvmAddress::from_hex(&self.apps.eth_app)
            .wrap_err("ETH_APP_ADDRESS must be a 20-byte hex address")?;
        let erc20 = EvmAddress::from_hex(&self.apps.erc20_app)
            .wrap_err("ERC20_APP_ADDRESS must be a 20-byte hex address")?;

        AppRoutes::new([
            (AssetClass::Eth, AppId(eth)),
            (AssetClass::Erc20, AppId(erc20)),
        ])
        .wrap_err("Invalid application routing")
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.relayer.retry_interval_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.relayer.release_timeout_ms)
    }
}

fn parse_optional<T>(value: Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .wrap_err_with(|| format!("{} has an invalid value: {}", key, v))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn vars(extra: &[(&str, &str)]) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = [
            ("SUBSTRATE_RPC_URL", "http://localhost:9933"),
            ("EVM_RPC_URL", "http://localhost:8545"),
            ("EVM_PRIVATE_KEY", KEY),
            ("ETH_APP_ADDRESS", "0xfc97a6197dc90bef6bbefd672742ed75e9768553"),
            ("ERC20_APP_ADDRESS", "0xeda338e4dc46038493b885327842fd3e301cab39"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        vars
    }

    fn load(vars: HashMap<String, String>) -> Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = assert_ok!(load(vars(&[])));
        assert_eq!(config.evm.finality_blocks, 12);
        assert_eq!(config.relayer.retry_interval_ms, 10_000);
        assert_eq!(config.relayer.channel_capacity, 256);
        assert_eq!(config.relayer.event_bus_capacity, 1024);
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.substrate.start_block, None);
        assert_eq!(config.retry_interval(), Duration::from_secs(10));
        assert_eq!(config.release_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_overrides() {
        let config = load(vars(&[
            ("SUBSTRATE_START_BLOCK", "1200"),
            ("EVM_FINALITY_BLOCKS", "3"),
            ("CHANNEL_CAPACITY", "8"),
            ("API_PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(config.substrate.start_block, Some(1200));
        assert_eq!(config.evm.finality_blocks, 3);
        assert_eq!(config.relayer.channel_capacity, 8);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_missing_required_var() {
        let mut vars = vars(&[]);
        vars.remove("ETH_APP_ADDRESS");
        let err = load(vars).unwrap_err();
        assert!(err.to_string().contains("ETH_APP_ADDRESS"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = load(vars(&[("RETRY_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("RETRY_INTERVAL_MS"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(load(vars(&[("CHANNEL_CAPACITY", "0")])).is_err());
        assert!(load(vars(&[("EVENT_BUS_CAPACITY", "0")])).is_err());
        assert!(load(vars(&[("RELEASE_TIMEOUT_MS", "0")])).is_err());
    }

    #[test]
    fn test_bad_private_key_rejected() {
        assert_err!(load(vars(&[("EVM_PRIVATE_KEY", "0x1234")])));
        assert_err!(load(vars(&[("SUBSTRATE_RPC_URL", "localhost:9933")])));
    }

    #[test]
    fn test_same_app_for_both_classes_rejected() {
        let err = load(vars(&[(
            "ERC20_APP_ADDRESS",
            "0xfc97a6197dc90bef6bbefd672742ed75e9768553",
        )]))
        .unwrap_err();
        assert!(format!("{:#}", err).contains("serves both"));
    }

    #[test]
    fn test_routes_follow_asset_class() {
        let config = load(vars(&[])).unwrap();
        let routes = config.routes().unwrap();
        assert_eq!(
            routes.app_for(AssetClass::Eth).unwrap().to_string(),
            "0xfc97a6197dc90bef6bbefd672742ed75e9768553"
        );
        assert_eq!(
            routes.app_for(AssetClass::Erc20).unwrap().to_string(),
            "0xeda338e4dc46038493b885327842fd3e301cab39"
        );
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let config = load(vars(&[])).unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&KEY[2..]));
    }
}
