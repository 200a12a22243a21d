use config::{Config, ConfigError, Environment, File};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::domain::TWAP_HANDLER;
use crate::eip712::{Eip712Domain, GPV2_SETTLEMENT};
use crate::error::{Result, WatchtowerError};
use crate::exchange::parse_order_book_kind;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub keeper: KeeperConfig,
    #[serde(default)]
    pub order_book: OrderBookConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// This agent's address; must be one of `participants`
    pub address: String,
    /// Every agent taking part in consensus
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    /// Maximum duration of a round, measured on block time
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,
    /// Completed rounds kept for inspection
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_round_timeout_secs() -> u64 {
    30
}

fn default_max_history() -> usize {
    64
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            round_timeout_secs: default_round_timeout_secs(),
            max_history: default_max_history(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Keeper selections per order before it is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,
}

fn default_max_retries() -> u64 {
    3
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookConfig {
    /// `http` or `in_memory`
    #[serde(default = "default_order_book_kind")]
    pub kind: String,
    #[serde(default = "default_order_book_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Use the in-memory book (no real submissions)
    #[serde(default)]
    pub dry_run: bool,
}

fn default_order_book_kind() -> String {
    "http".to_string()
}

fn default_order_book_url() -> String {
    "https://api.cow.fi/mainnet/api/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            kind: default_order_book_kind(),
            base_url: default_order_book_url(),
            request_timeout_ms: default_request_timeout_ms(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// GPv2 settlement contract (EIP-712 verifying contract)
    #[serde(default = "default_settlement")]
    pub settlement: String,
    /// TWAP handler whose orders are dropped once expired
    #[serde(default = "default_twap_handler")]
    pub twap_handler: String,
}

fn default_chain_id() -> u64 {
    1
}

fn default_settlement() -> String {
    GPV2_SETTLEMENT.to_string()
}

fn default_twap_handler() -> String {
    format!("{:?}", TWAP_HANDLER)
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            settlement: default_settlement(),
            twap_handler: default_twap_handler(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| WatchtowerError::AddressParsing(format!("{}: {}", raw, e)))
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("consensus.round_timeout_secs", 30)?
            .set_default("keeper.max_retries", 3)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WATCHTOWER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WATCHTOWER__ORDER_BOOK__BASE_URL, etc.)
            .add_source(
                Environment::with_prefix("WATCHTOWER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("agent.participants"),
            );

        builder.build()?.try_deserialize()
    }

    /// Four local agents on a dev chain, for CLI usage
    pub fn default_config() -> Self {
        let participants: Vec<String> = (1..=4u64)
            .map(|i| format!("{:?}", Address::from_low_u64_be(i)))
            .collect();

        Self {
            agent: AgentConfig {
                address: participants[0].clone(),
                participants,
            },
            consensus: ConsensusConfig::default(),
            keeper: KeeperConfig::default(),
            order_book: OrderBookConfig::default(),
            chain: ChainConfig {
                chain_id: 31337,
                ..ChainConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    pub fn own_address(&self) -> Result<Address> {
        parse_address(&self.agent.address)
    }

    pub fn participant_addresses(&self) -> Result<Vec<Address>> {
        self.agent.participants.iter().map(|p| parse_address(p)).collect()
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.consensus.round_timeout_secs)
    }

    pub fn twap_handler(&self) -> Result<Address> {
        parse_address(&self.chain.twap_handler)
    }

    pub fn domain(&self) -> Result<Eip712Domain> {
        Ok(Eip712Domain::gpv2(
            self.chain.chain_id,
            parse_address(&self.chain.settlement)?,
        ))
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Participants
        if self.agent.participants.is_empty() {
            errors.push("agent.participants must not be empty".to_string());
        }
        let mut seen = BTreeSet::new();
        for raw in &self.agent.participants {
            match parse_address(raw) {
                Ok(address) => {
                    if !seen.insert(address) {
                        errors.push(format!("duplicate participant {}", raw));
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
        }
        match self.own_address() {
            Ok(own) if !seen.contains(&own) => {
                errors.push(format!("agent.address {} is not a participant", self.agent.address))
            }
            Ok(_) => {}
            Err(e) => errors.push(e.to_string()),
        }

        // Timing
        if self.consensus.round_timeout_secs == 0 {
            errors.push("consensus.round_timeout_secs must be positive".to_string());
        }
        if self.order_book.request_timeout_ms == 0 {
            errors.push("order_book.request_timeout_ms must be positive".to_string());
        }
        if self.keeper.max_retries == 0 {
            errors.push("keeper.max_retries must be positive".to_string());
        }

        // Endpoints
        if let Err(e) = url::Url::parse(&self.order_book.base_url) {
            errors.push(format!("order_book.base_url is not a valid URL: {}", e));
        }
        if let Err(e) = parse_order_book_kind(&self.order_book.kind) {
            errors.push(e.to_string());
        }
        if let Err(e) = parse_address(&self.chain.settlement) {
            errors.push(e.to_string());
        }
        if let Err(e) = self.twap_handler() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
