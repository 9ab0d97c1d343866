//! # Configuration Management Module
//!
//! All runtime settings for guildmarket live in one TOML file. Every section has
//! defaults so a partial file (or none at all, via `guildmarket init`) is enough.
//!
//! ## Configuration Structure
//!
//! - [`AppConfig`] - display name, router basename and the allow-list of pages
//! - [`StorageConfig`] - data directory and optional market database path
//! - [`MarketConfig`] - branches, starting funds, guild permits and NPC stock
//! - [`LoggingConfig`] - log level and optional log files
//! - [`SecurityConfig`] - argon2 password hashing parameters
//!
//! ## Usage
//!
//! ```rust,no_run
//! use guildmarket::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Default branch: {}", config.market.default_branch);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [app]
//! name = "Guild Market"
//! basename = "/Marketplace"
//!
//! [storage]
//! data_dir = "./data"
//!
//! [market]
//! default_branch = "Portsmouth"
//! starting_crowns = 0
//! starting_pennies = 0
//!
//! [[market.npc_stock]]
//! name = "Shortsword"
//! crowns = 4
//! pennies = 6
//! category = "weapons"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

use crate::market::{Category, Guild, Money};

/// Pages an authenticated user with a character may stay on.
pub const DEFAULT_ALLOWED_PATHS: [&str; 8] = [
    "/",
    "/home",
    "/character-inventory",
    "/marketplace",
    "/branch-members",
    "/the-recently-dead",
    "/local-marketplace",
    "/blacksmith",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: Option<SecurityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    /// Prefix stripped from incoming paths ("/Marketplace/home" -> "/home").
    #[serde(default = "default_basename")]
    pub basename: String,
    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<String>,
}

fn default_basename() -> String {
    "/Marketplace".to_string()
}

fn default_allowed_paths() -> Vec<String> {
    DEFAULT_ALLOWED_PATHS.iter().map(|p| p.to_string()).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Guild Market".to_string(),
            basename: default_basename(),
            allowed_paths: default_allowed_paths(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Optional override for the market sled database; defaults to `<data_dir>/market`.
    #[serde(default)]
    pub market_db_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            market_db_path: None,
        }
    }
}

impl StorageConfig {
    pub fn market_db_path(&self) -> PathBuf {
        match &self.market_db_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("market"),
        }
    }
}

/// A system-stocked listing the `replenish` action keeps available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcStockConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub crowns: u64,
    #[serde(default)]
    pub pennies: u64,
    pub category: Category,
}

impl NpcStockConfig {
    pub fn price(&self) -> Result<Money> {
        Money::new(self.crowns, self.pennies)
            .map_err(|e| anyhow!("Invalid price for NPC stock '{}': {}", self.name, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub default_branch: String,
    #[serde(default = "default_branches")]
    pub branches: Vec<String>,
    #[serde(default)]
    pub starting_crowns: u64,
    #[serde(default)]
    pub starting_pennies: u64,
    /// Pennies added by the EARN action on the inventory page.
    #[serde(default = "default_earn_pennies")]
    pub earn_pennies: u64,
    #[serde(default = "default_recently_dead_limit")]
    pub recently_dead_limit: usize,
    #[serde(default = "default_latest_items_limit")]
    pub latest_items_limit: usize,
    /// Guild name -> permit tags granted at character creation.
    #[serde(default = "default_guild_permits")]
    pub guild_permits: HashMap<String, Vec<String>>,
    #[serde(default = "default_npc_stock")]
    pub npc_stock: Vec<NpcStockConfig>,
}

fn default_branches() -> Vec<String> {
    vec!["Portsmouth".to_string(), "Guildford".to_string()]
}

fn default_earn_pennies() -> u64 {
    10
}

fn default_recently_dead_limit() -> usize {
    20
}

fn default_latest_items_limit() -> usize {
    3
}

fn default_guild_permits() -> HashMap<String, Vec<String>> {
    let mut permits = HashMap::new();
    permits.insert(
        Guild::Mercenary.as_str().to_string(),
        vec!["weapon".to_string(), "armour".to_string()],
    );
    permits.insert(Guild::Scout.as_str().to_string(), vec!["weapon".to_string()]);
    permits
}

fn default_npc_stock() -> Vec<NpcStockConfig> {
    vec![NpcStockConfig {
        name: "Shortsword".to_string(),
        description: Some(
            "A basic, well-balanced shortsword, ideal for new adventurers.".to_string(),
        ),
        crowns: 4,
        pennies: 6,
        category: Category::Weapons,
    }]
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            default_branch: "Portsmouth".to_string(),
            branches: default_branches(),
            starting_crowns: 0,
            starting_pennies: 0,
            earn_pennies: default_earn_pennies(),
            recently_dead_limit: default_recently_dead_limit(),
            latest_items_limit: default_latest_items_limit(),
            guild_permits: default_guild_permits(),
            npc_stock: default_npc_stock(),
        }
    }
}

impl MarketConfig {
    pub fn starting_money(&self) -> Money {
        Money::normalized(self.starting_crowns, self.starting_pennies)
    }

    pub fn earn_amount(&self) -> Money {
        Money::normalized(0, self.earn_pennies)
    }

    pub fn permits_for(&self, guild: Guild) -> Vec<String> {
        self.guild_permits
            .get(guild.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default)]
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("guildmarket.log".to_string()),
            security_file: Some("guildmarket-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings that would break the market invariants.
    pub fn validate(&self) -> Result<()> {
        if !self.app.basename.is_empty() && !self.app.basename.starts_with('/') {
            return Err(anyhow!(
                "app.basename must start with '/', got '{}'",
                self.app.basename
            ));
        }
        if self.market.default_branch.trim().is_empty() {
            return Err(anyhow!("market.default_branch must not be empty"));
        }
        for stock in &self.market.npc_stock {
            stock.price()?;
        }
        for guild in self.market.guild_permits.keys() {
            guild
                .parse::<Guild>()
                .map_err(|e| anyhow!("market.guild_permits: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.app.basename, "/Marketplace");
        assert_eq!(config.app.allowed_paths.len(), 8);
        assert_eq!(config.market.earn_amount(), Money::new(0, 10).unwrap());
        assert_eq!(config.market.starting_money(), Money::ZERO);
    }

    #[test]
    fn test_guild_permit_defaults() {
        let market = MarketConfig::default();
        assert_eq!(market.permits_for(Guild::Mercenary), vec!["weapon", "armour"]);
        assert_eq!(market.permits_for(Guild::Scout), vec!["weapon"]);
        assert!(market.permits_for(Guild::Blacksmith).is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [market]
            default_branch = "Guildford"
            starting_crowns = 2
            starting_pennies = 14
            "#,
        )
        .unwrap();
        assert_eq!(config.market.default_branch, "Guildford");
        assert_eq!(config.market.starting_money(), Money::new(3, 2).unwrap());
        assert_eq!(config.market.npc_stock[0].name, "Shortsword");
        assert_eq!(config.storage.market_db_path(), PathBuf::from("./data").join("market"));
    }

    #[test]
    fn test_invalid_npc_price_is_rejected() {
        let mut config = Config::default();
        config.market.npc_stock[0].pennies = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.market.npc_stock, Config::default().market.npc_stock);
        assert_eq!(parsed.app.allowed_paths, Config::default().app.allowed_paths);
    }
}
