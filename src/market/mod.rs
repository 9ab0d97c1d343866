//! Market data model, persistence and flows.
//! Characters, their inventories and permits, and the listings they trade live in
//! a sled-backed [`MarketStore`]; the flow modules validate input and call its
//! single-step procedures.

pub mod characters;
pub mod currency;
pub mod errors;
pub mod inventory;
pub mod marketplace;
pub mod shop;
pub mod social;
pub mod storage;
pub mod types;

pub use characters::{
    create_character, die, earn_pennies, generate_characters, grant_permit, parse_race,
    parse_selectable_guild, retire,
};
pub use currency::{parse_money, settle_purchase, Money, PENNIES_PER_CROWN};
pub use errors::MarketError;
pub use inventory::format_inventory;
pub use marketplace::{
    buy, delist, global_listings, latest_listings, local_listings, sell, validate_sale,
};
pub use shop::{add_shop_item, generate_items, replenish, Replenished, ITEM_TEMPLATES};
pub use social::{branch_members, dead_characters_with_owners, recently_dead, DeceasedEntry};
pub use storage::{MarketStore, MarketStoreBuilder, Purchase};
pub use types::*;
