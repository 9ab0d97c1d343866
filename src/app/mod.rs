//! Console front end: the navigation gate, sessions, page rendering, command
//! processing and the stdin/stdout server loop.

pub mod commands;
pub mod gate;
pub mod server;
pub mod session;
pub mod views;

use anyhow::{anyhow, Result};
use log::info;

use crate::config::Config;
use crate::market::{replenish, MarketStore, MarketStoreBuilder};
use crate::storage::{argon2_params, AccountStore};
use gate::AllowList;

pub use commands::CommandProcessor;
pub use gate::{normalize_path, redirect_for, AccessState, Route};
pub use server::AppServer;
pub use session::Session;

/// Everything a command needs: configuration and both stores.
pub struct AppContext {
    pub config: Config,
    pub market: MarketStore,
    pub accounts: AccountStore,
    pub allow: AllowList,
}

impl AppContext {
    /// Open the account and market stores described by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let params = argon2_params(config.security.as_ref().and_then(|s| s.argon2.as_ref()))?;
        let accounts = AccountStore::new_with_params(&config.storage.data_dir, params).await?;
        let db_path = config.storage.market_db_path();
        let market = MarketStoreBuilder::new(&db_path)
            .open()
            .map_err(|e| anyhow!("Failed to open market store {}: {}", db_path.display(), e))?;
        let allow = AllowList::new(&config.app.allowed_paths);
        info!(
            "Opened {} (accounts in {}, market in {})",
            config.app.name,
            config.storage.data_dir,
            db_path.display()
        );
        Ok(AppContext {
            config,
            market,
            accounts,
            allow,
        })
    }

    /// Run `replenish` over every configured NPC stock entry.
    pub fn replenish_stock(&self) -> Result<usize> {
        let mut changed = 0;
        for stock in &self.config.market.npc_stock {
            let outcome = replenish(&self.market, stock)
                .map_err(|e| anyhow!("Failed to replenish {}: {}", stock.name, e))?;
            if outcome != crate::market::Replenished::AlreadyStocked {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
