#![allow(dead_code)]

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Root configuration tree, loaded from a YAML file with environment
/// variable overrides layered on top (`WAYFINDER__SERVER__PORT`, etc).
#[derive(Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub canton: CantonConfig,
    pub ethereum: EthereumConfig,
    pub reconciliation: ReconciliationConfig,
    pub shutdown: ShutdownConfig,
    pub eth_rpc: EthRpcConfig,
    pub token: TokenConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("logging", &self.logging)
            .field("database", &self.database)
            .field("canton", &self.canton)
            .field("ethereum", &self.ethereum)
            .field("reconciliation", &self.reconciliation)
            .field("shutdown", &self.shutdown)
            .field("eth_rpc", &self.eth_rpc)
            .field("token", &self.token)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

/// Custom Debug that redacts the database URL (may carry credentials).
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Ledger connection settings.
#[derive(Clone, Deserialize)]
pub struct CantonConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub tls: bool,
    pub auth: CantonAuthConfig,
    pub relayer_party: String,
    pub domain_id: String,
    pub bridge_package_id: String,
    #[serde(default = "default_bridge_module")]
    pub bridge_module: String,
    pub core_package_id: String,
    pub common_package_id: String,
    pub cip56_package_id: String,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl fmt::Debug for CantonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CantonConfig")
            .field("rpc_url", &self.rpc_url)
            .field("tls", &self.tls)
            .field("auth", &self.auth)
            .field("relayer_party", &self.relayer_party)
            .field("domain_id", &self.domain_id)
            .field("bridge_package_id", &self.bridge_package_id)
            .field("bridge_module", &self.bridge_module)
            .field("core_package_id", &self.core_package_id)
            .field("common_package_id", &self.common_package_id)
            .field("cip56_package_id", &self.cip56_package_id)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

/// OAuth2 client-credentials settings for the ledger's token endpoint.
#[derive(Clone, Deserialize)]
pub struct CantonAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub audience: Option<String>,
}

impl fmt::Debug for CantonAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CantonAuthConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("audience", &self.audience)
            .finish()
    }
}

/// EVM chain connection and signing settings.
#[derive(Clone, Deserialize)]
pub struct EthereumConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    pub chain_id: u64,
    pub bridge_contract: String,
    pub token_contract: String,
    pub relayer_private_key: String,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u128,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default = "default_finality_blocks")]
    pub finality_blocks: u64,
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
}

impl fmt::Debug for EthereumConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthereumConfig")
            .field("rpc_url", &self.rpc_url)
            .field("ws_url", &self.ws_url)
            .field("chain_id", &self.chain_id)
            .field("bridge_contract", &self.bridge_contract)
            .field("token_contract", &self.token_contract)
            .field("relayer_private_key", &"<redacted>")
            .field("gas_limit", &self.gas_limit)
            .field("max_gas_price", &self.max_gas_price)
            .field("polling_interval_ms", &self.polling_interval_ms)
            .field("start_block", &self.start_block)
            .field("finality_blocks", &self.finality_blocks)
            .field("lookback_blocks", &self.lookback_blocks)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_reconciliation_initial_timeout_secs")]
    pub initial_timeout_secs: u64,
    #[serde(default = "default_reconciliation_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

/// The custodial ERC-20 JSON-RPC facade.
#[derive(Debug, Clone, Deserialize)]
pub struct EthRpcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub chain_id: u64,
    pub token_address: String,
    pub demo_token_address: String,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price_wei")]
    pub gas_price_wei: u128,
    #[serde(default = "default_native_balance_wei")]
    pub native_balance_wei: u128,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// When false (default), `eth_blockNumber` overstates the head by 12 to
    /// discourage wallets from treating it as a finalized tip. See
    /// SPEC_FULL §9 open question on `BlockNumber()`.
    #[serde(default)]
    pub exact_head: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_name")]
    pub name: String,
    #[serde(default = "default_token_symbol")]
    pub symbol: String,
    #[serde(default = "default_token_decimals")]
    pub decimals: u8,
}

fn default_http_port() -> u16 {
    9090
}
fn default_log_filter() -> String {
    "info".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_bridge_module() -> String {
    "Bridge".to_string()
}
fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}
fn default_gas_limit() -> u64 {
    200_000
}
fn default_max_gas_price() -> u128 {
    100_000_000_000 // 100 gwei
}
fn default_polling_interval() -> u64 {
    3000
}
fn default_finality_blocks() -> u64 {
    12
}
fn default_lookback_blocks() -> u64 {
    1000
}
fn default_reconciliation_initial_timeout_secs() -> u64 {
    30
}
fn default_reconciliation_interval_secs() -> u64 {
    3600
}
fn default_shutdown_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_gas_price_wei() -> u128 {
    2_000_000_000 // 2 gwei
}
fn default_native_balance_wei() -> u128 {
    1_000_000_000_000_000_000 // 1 ETH, a cosmetic balance for wallets
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_token_name() -> String {
    "Wayfinder Prompt".to_string()
}
fn default_token_symbol() -> String {
    "PROMPT".to_string()
}
fn default_token_decimals() -> u8 {
    18
}

impl Config {
    /// Load configuration from a YAML file, with env vars (`WAYFINDER__*`,
    /// double-underscore separated) overriding anything the file sets. A
    /// local `.env` is loaded first, same as the teacher's `Config::load`.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.yaml")
    }

    pub fn load_from_path(path: &str) -> Result<Self> {
        if Path::new(".env").exists() {
            dotenvy::from_filename(".env").wrap_err("failed to load .env file")?;
        }

        let mut builder = config::Config::builder();
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("WAYFINDER")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .wrap_err("failed to build configuration")?;
        let config: Config = raw
            .try_deserialize()
            .wrap_err("failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }
        if self.canton.rpc_url.is_empty() {
            return Err(eyre!("canton.rpc_url cannot be empty"));
        }
        if self.canton.relayer_party.is_empty() {
            return Err(eyre!("canton.relayer_party cannot be empty"));
        }
        if self.ethereum.rpc_url.is_empty() {
            return Err(eyre!("ethereum.rpc_url cannot be empty"));
        }
        if self.ethereum.bridge_contract.len() != 42
            || !self.ethereum.bridge_contract.starts_with("0x")
        {
            return Err(eyre!(
                "ethereum.bridge_contract must be a valid hex address (42 chars with 0x prefix)"
            ));
        }
        if self.ethereum.relayer_private_key.len() != 66
            || !self.ethereum.relayer_private_key.starts_with("0x")
        {
            return Err(eyre!(
                "ethereum.relayer_private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }
        if self.eth_rpc.enabled
            && (self.eth_rpc.token_address.len() != 42
                || !self.eth_rpc.token_address.starts_with("0x"))
        {
            return Err(eyre!(
                "eth_rpc.token_address must be a valid hex address when eth_rpc is enabled"
            ));
        }
        if self.token.decimals > 36 {
            return Err(eyre!("token.decimals is implausibly large"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            server: ServerConfig { http_port: 9090 },
            logging: LoggingConfig {
                filter: "info".to_string(),
                json: false,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
                max_connections: 10,
            },
            canton: CantonConfig {
                rpc_url: "https://ledger.example:6865".to_string(),
                tls: true,
                auth: CantonAuthConfig {
                    token_url: "https://auth.example/token".to_string(),
                    client_id: "relayer".to_string(),
                    client_secret: "secret".to_string(),
                    audience: None,
                },
                relayer_party: "relayer::1220abcd".to_string(),
                domain_id: "domain::1220abcd".to_string(),
                bridge_package_id: "abcd1234".to_string(),
                bridge_module: "Bridge".to_string(),
                core_package_id: "abcd1234".to_string(),
                common_package_id: "abcd1234".to_string(),
                cip56_package_id: "abcd1234".to_string(),
                max_message_size: 16 * 1024 * 1024,
            },
            ethereum: EthereumConfig {
                rpc_url: "http://localhost:8545".to_string(),
                ws_url: None,
                chain_id: 1,
                bridge_contract: "0x0000000000000000000000000000000000000001".to_string(),
                token_contract: "0x0000000000000000000000000000000000000002".to_string(),
                relayer_private_key:
                    "0x0000000000000000000000000000000000000000000000000000000000000001"
                        .to_string(),
                gas_limit: 200_000,
                max_gas_price: 100_000_000_000,
                polling_interval_ms: 3000,
                start_block: None,
                finality_blocks: 12,
                lookback_blocks: 1000,
            },
            reconciliation: ReconciliationConfig {
                initial_timeout_secs: 30,
                interval_secs: 3600,
            },
            shutdown: ShutdownConfig {
                timeout_secs: 30,
            },
            eth_rpc: EthRpcConfig {
                enabled: true,
                chain_id: 1,
                token_address: "0x0000000000000000000000000000000000000002".to_string(),
                demo_token_address: "0x0000000000000000000000000000000000000003".to_string(),
                gas_limit: 200_000,
                gas_price_wei: 2_000_000_000,
                native_balance_wei: 1_000_000_000_000_000_000,
                request_timeout_secs: 10,
                exact_head: false,
            },
            token: TokenConfig {
                name: "Wayfinder Prompt".to_string(),
                symbol: "PROMPT".to_string(),
                decimals: 18,
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_private_key_length_rejected() {
        let mut config = sample_config();
        config.ethereum.relayer_private_key = "0x123".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bridge_contract_rejected() {
        let mut config = sample_config();
        config.ethereum.bridge_contract = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_eth_rpc_token_address_rejected_only_when_enabled() {
        let mut config = sample_config();
        config.eth_rpc.token_address = "bogus".to_string();
        assert!(config.validate().is_err());

        config.eth_rpc.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = sample_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains(&config.ethereum.relayer_private_key));
    }
}
