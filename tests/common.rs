#![allow(dead_code)]
//! Shared fixtures for the integration tests.

use guildmarket::app::AppContext;
use guildmarket::config::{Argon2Config, Config, SecurityConfig};
use guildmarket::market::{CharacterRecord, Guild, MarketStore, MarketStoreBuilder, Money, Race};
use tempfile::TempDir;

pub fn market_store() -> (TempDir, MarketStore) {
    let dir = TempDir::new().unwrap();
    let store = MarketStoreBuilder::new(dir.path().join("market")).open().unwrap();
    (dir, store)
}

/// Config rooted in `dir` with cheap Argon2 parameters.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data").to_string_lossy().to_string();
    config.security = Some(SecurityConfig {
        argon2: Some(Argon2Config {
            memory_kib: Some(1024),
            time_cost: Some(1),
            parallelism: Some(1),
        }),
    });
    config
}

pub async fn context() -> (TempDir, AppContext) {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::open(test_config(&dir)).await.unwrap();
    (dir, ctx)
}

/// Store an active character for `user` holding `crowns`/`pennies`.
pub fn character(store: &MarketStore, user: &str, name: &str, crowns: u64, pennies: u64) -> CharacterRecord {
    let c = CharacterRecord::new(user, name, Race::Human, Guild::Mercenary, "Portsmouth")
        .with_money(Money::new(crowns, pennies).unwrap());
    store.create_character(&c, &[], false).unwrap();
    c
}
