//! Client configuration.
//!
//! Values come from defaults, then `CELOFLOW_*` environment variables, then
//! command-line flags (applied by the binary).

use std::time::Duration;

use crate::address::{Address, AddressError};

/// Celo Alfajores testnet.
pub const ALFAJORES_CHAIN_ID: u64 = 44_787;
/// Celo mainnet.
pub const CELO_MAINNET_CHAIN_ID: u64 = 42_220;
pub const ALFAJORES_RPC_URL: &str = "https://celo-alfajores.drpc.org";

pub const ENV_RPC_URL: &str = "CELOFLOW_RPC_URL";
pub const ENV_CONTRACT_ADDRESS: &str = "CELOFLOW_CONTRACT_ADDRESS";
/// Accepted as a fallback so existing web deployments' env files work as-is.
pub const ENV_CONTRACT_ADDRESS_FALLBACK: &str = "NEXT_PUBLIC_CELOFLOW_CONTRACT_ADDRESS";
pub const ENV_CHAIN_ID: &str = "CELOFLOW_CHAIN_ID";
pub const ENV_POLL_INTERVAL_MS: &str = "CELOFLOW_POLL_INTERVAL_MS";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "CELOFLOW_HTTP_TIMEOUT_SECS";
pub const ENV_CONFIRMATION_TIMEOUT_SECS: &str = "CELOFLOW_CONFIRMATION_TIMEOUT_SECS";
pub const ENV_ACCOUNT: &str = "CELOFLOW_ACCOUNT";

/// Addresses that pass validation but are almost certainly not a deployment.
/// Burn addresses are rejected outright by [`ClientConfig::contract_address`].
const PLACEHOLDER_ADDRESSES: [Address; 1] = [Address::repeat_byte(0x11)];

// =============================================================================
// Errors
// =============================================================================

/// Configuration problems. Any of these blocks contract access entirely.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("contract address is not configured; set {}", ENV_CONTRACT_ADDRESS)]
    MissingContractAddress,
    #[error("invalid contract address {value:?}: {source}")]
    InvalidContractAddress {
        value: String,
        #[source]
        source: AddressError,
    },
    #[error("contract address {0} is a burn address and cannot be used")]
    BurnContractAddress(Address),
    #[error("invalid account override {value:?}: {source}")]
    InvalidAccount {
        value: String,
        #[source]
        source: AddressError,
    },
}

// =============================================================================
// ClientConfig
// =============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// JSON-RPC endpoint, also used as the signer.
    pub rpc_url: String,
    /// Raw contract address as configured; validated by
    /// [`ClientConfig::contract_address`].
    pub contract_address: Option<String>,
    /// The only network actions are allowed on.
    pub chain_id: u64,
    /// Dashboard refresh period.
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    /// How often to ask for a receipt while confirming.
    pub receipt_poll_interval: Duration,
    pub confirmation_timeout: Duration,
    /// Account to act as instead of the signer's first account.
    pub account: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: ALFAJORES_RPC_URL.to_string(),
            contract_address: None,
            chain_id: ALFAJORES_CHAIN_ID,
            poll_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(10),
            receipt_poll_interval: Duration::from_secs(1),
            confirmation_timeout: Duration::from_secs(120),
            account: None,
        }
    }
}

impl ClientConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Blank and unparsable values
    /// are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = get(ENV_RPC_URL) {
            config.rpc_url = url;
        }
        config.contract_address = get(ENV_CONTRACT_ADDRESS).or_else(|| get(ENV_CONTRACT_ADDRESS_FALLBACK));
        if let Some(id) = get(ENV_CHAIN_ID).and_then(|v| v.parse().ok()) {
            config.chain_id = id;
        }
        if let Some(ms) = get(ENV_POLL_INTERVAL_MS).and_then(|v| v.parse::<u64>().ok()) {
            if ms > 0 {
                config.poll_interval = Duration::from_millis(ms);
            }
        }
        if let Some(secs) = get(ENV_HTTP_TIMEOUT_SECS).and_then(|v| v.parse().ok()) {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = get(ENV_CONFIRMATION_TIMEOUT_SECS).and_then(|v| v.parse().ok()) {
            config.confirmation_timeout = Duration::from_secs(secs);
        }
        config.account = get(ENV_ACCOUNT);

        config
    }

    /// The validated contract address.
    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        let raw = self
            .contract_address
            .as_deref()
            .ok_or(ConfigError::MissingContractAddress)?;
        let address: Address = raw
            .parse()
            .map_err(|source| ConfigError::InvalidContractAddress {
                value: raw.to_string(),
                source,
            })?;
        if address.is_burn() {
            return Err(ConfigError::BurnContractAddress(address));
        }
        Ok(address)
    }

    /// The validated account override, if any.
    pub fn account_override(&self) -> Result<Option<Address>, ConfigError> {
        self.account
            .as_deref()
            .map(|raw| {
                raw.parse().map_err(|source| ConfigError::InvalidAccount {
                    value: raw.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Full configuration report for display.
    pub fn status(&self) -> ConfigStatus {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let address = match self.contract_address() {
            Ok(address) => {
                if PLACEHOLDER_ADDRESSES.contains(&address) {
                    warnings.push("contract address appears to be a test/placeholder address".to_string());
                }
                Some(address)
            }
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        };
        if let Err(e) = self.account_override() {
            errors.push(e.to_string());
        }

        ConfigStatus {
            configured: errors.is_empty(),
            address,
            network: network_name(self.chain_id),
            chain_id: self.chain_id,
            warnings,
            errors,
        }
    }
}

/// Human-readable name of a chain id.
pub fn network_name(chain_id: u64) -> String {
    match chain_id {
        ALFAJORES_CHAIN_ID => "Celo Alfajores".to_string(),
        CELO_MAINNET_CHAIN_ID => "Celo".to_string(),
        other => format!("Chain {other}"),
    }
}

/// Outcome of validating a [`ClientConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStatus {
    pub configured: bool,
    pub address: Option<Address>,
    pub network: String,
    pub chain_id: u64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigStatus {
    /// `0x1234...5678`, or `Not Configured`.
    pub fn display_address(&self) -> String {
        self.address
            .map(|a| a.shorten())
            .unwrap_or_else(|| "Not Configured".to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONTRACT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.rpc_url, ALFAJORES_RPC_URL);
        assert_eq!(config.chain_id, ALFAJORES_CHAIN_ID);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(120));
        assert_eq!(
            config.contract_address(),
            Err(ConfigError::MissingContractAddress)
        );
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_RPC_URL, "http://localhost:8545"),
            (ENV_CONTRACT_ADDRESS, CONTRACT),
            (ENV_CHAIN_ID, "42220"),
            (ENV_POLL_INTERVAL_MS, "250"),
            (ENV_CONFIRMATION_TIMEOUT_SECS, "30"),
        ]));
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.chain_id, CELO_MAINNET_CHAIN_ID);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(30));
        assert_eq!(config.contract_address().unwrap().to_string(), CONTRACT);
    }

    #[test]
    fn test_fallback_env_name_and_blank_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_CONTRACT_ADDRESS, "  "),
            (ENV_CONTRACT_ADDRESS_FALLBACK, CONTRACT),
            (ENV_POLL_INTERVAL_MS, "0"),
            (ENV_CHAIN_ID, "not-a-number"),
        ]));
        assert!(config.contract_address().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.chain_id, ALFAJORES_CHAIN_ID);
    }

    #[test]
    fn test_contract_address_errors() {
        let mut config = ClientConfig {
            contract_address: Some("0x1234".into()),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.contract_address(),
            Err(ConfigError::InvalidContractAddress { .. })
        ));

        config.contract_address = Some("0x0000000000000000000000000000000000000000".into());
        assert_eq!(
            config.contract_address(),
            Err(ConfigError::BurnContractAddress(Address::ZERO))
        );
    }

    #[test]
    fn test_status_reports_placeholder_warning() {
        let config = ClientConfig {
            contract_address: Some("0x1111111111111111111111111111111111111111".into()),
            ..ClientConfig::default()
        };
        let status = config.status();
        assert!(status.configured);
        assert_eq!(status.warnings.len(), 1);
        assert_eq!(status.network, "Celo Alfajores");
        assert_eq!(status.display_address(), "0x1111...1111");
    }

    #[test]
    fn test_burn_address_is_an_error_not_a_warning() {
        let config = ClientConfig {
            contract_address: Some("0x000000000000000000000000000000000000dEaD".into()),
            ..ClientConfig::default()
        };
        let status = config.status();
        assert!(!status.configured);
        assert!(status.warnings.is_empty());
        assert_eq!(
            status.errors,
            vec![ConfigError::BurnContractAddress(Address::DEAD).to_string()]
        );
    }

    #[test]
    fn test_status_not_configured() {
        let status = ClientConfig::default().status();
        assert!(!status.configured);
        assert_eq!(status.errors.len(), 1);
        assert_eq!(status.display_address(), "Not Configured");
    }

    #[test]
    fn test_account_override() {
        let config = ClientConfig {
            account: Some("nope".into()),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.account_override(),
            Err(ConfigError::InvalidAccount { .. })
        ));
        assert_eq!(ClientConfig::default().account_override(), Ok(None));
    }
}
