//! NPC shop stock and generated listings.
//!
//! This module provides:
//! - System listings (no seller) added by administrators
//! - Replenishment of configured stock entries that sold out
//! - Random item generation from a fixed template table

use log::info;
use rand::Rng;

use crate::config::NpcStockConfig;
use crate::market::currency::Money;
use crate::market::errors::MarketError;
use crate::market::storage::MarketStore;
use crate::market::types::{Category, ListingRecord};

/// A template for randomly generated items
#[derive(Debug, Clone, Copy)]
pub struct ItemTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub min_crowns: u64,
    pub max_crowns: u64,
}

pub const ITEM_TEMPLATES: [ItemTemplate; 15] = [
    ItemTemplate { name: "Iron Sword", description: "A sturdy sword, good for beginners.", min_crowns: 5, max_crowns: 15 },
    ItemTemplate { name: "Leather Armor", description: "Light and flexible protection.", min_crowns: 8, max_crowns: 20 },
    ItemTemplate { name: "Healing Potion", description: "Restores a small amount of health.", min_crowns: 1, max_crowns: 3 },
    ItemTemplate { name: "Wooden Shield", description: "A basic shield for defense.", min_crowns: 3, max_crowns: 10 },
    ItemTemplate { name: "Magic Scroll", description: "Contains a minor spell.", min_crowns: 10, max_crowns: 30 },
    ItemTemplate { name: "Gold Ring", description: "A simple, elegant ring.", min_crowns: 15, max_crowns: 40 },
    ItemTemplate { name: "Traveler's Cloak", description: "Keeps you warm on long journeys.", min_crowns: 4, max_crowns: 12 },
    ItemTemplate { name: "Enchanted Dagger", description: "A sharp blade with a faint glow.", min_crowns: 20, max_crowns: 50 },
    ItemTemplate { name: "Mysterious Orb", description: "Pulsates with an unknown energy.", min_crowns: 30, max_crowns: 70 },
    ItemTemplate { name: "Dragon Scale", description: "A rare and valuable material.", min_crowns: 50, max_crowns: 100 },
    ItemTemplate { name: "Elven Bow", description: "A finely crafted bow, light and accurate.", min_crowns: 25, max_crowns: 60 },
    ItemTemplate { name: "Dwarven Axe", description: "Heavy and powerful, ideal for close combat.", min_crowns: 18, max_crowns: 45 },
    ItemTemplate { name: "Goblin Ear", description: "A gruesome trophy, surprisingly valuable.", min_crowns: 2, max_crowns: 8 },
    ItemTemplate { name: "Phoenix Feather", description: "Said to bring good fortune and rebirth.", min_crowns: 75, max_crowns: 150 },
    ItemTemplate { name: "Map to Lost Treasure", description: "A tattered map hinting at forgotten riches.", min_crowns: 40, max_crowns: 90 },
];

impl ItemTemplate {
    /// Category inferred from the item name
    pub fn category(&self) -> Category {
        let lower = self.name.to_ascii_lowercase();
        if ["sword", "dagger", "bow", "axe"].iter().any(|w| lower.contains(w)) {
            Category::Weapons
        } else if ["armor", "shield", "cloak"].iter().any(|w| lower.contains(w)) {
            Category::Armour
        } else if lower.contains("potion") {
            Category::Consumable
        } else {
            Category::Misc
        }
    }

    /// Roll a price in this template's crown range with 0-11 pennies.
    pub fn roll_price<R: Rng + ?Sized>(&self, rng: &mut R) -> Money {
        Money::normalized(
            rng.gen_range(self.min_crowns..=self.max_crowns),
            rng.gen_range(0..12),
        )
    }
}

/// Result of a replenish pass over one stock entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replenished {
    Inserted,
    Restocked,
    AlreadyStocked,
}

/// Insert a system listing with no seller.
pub fn add_shop_item(
    store: &MarketStore,
    name: &str,
    price: Money,
    category: Category,
    quantity: u32,
) -> Result<ListingRecord, MarketError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MarketError::Validation("Item name is required.".to_string()));
    }
    if price.is_zero() {
        return Err(MarketError::Validation("Price cannot be zero.".to_string()));
    }
    if quantity == 0 {
        return Err(MarketError::Validation("Quantity must be at least 1.".to_string()));
    }
    let listing = ListingRecord::new(name, price, category, quantity);
    store.insert_listings(std::slice::from_ref(&listing))?;
    info!("Shop item added: {} x{} at {}", listing.name, quantity, price);
    Ok(listing)
}

/// Make sure a configured stock entry is buyable: insert it with quantity 1 when
/// missing, bump it to 1 when sold out, otherwise leave it alone.
pub fn replenish(store: &MarketStore, stock: &NpcStockConfig) -> Result<Replenished, MarketError> {
    let price = Money::new(stock.crowns, stock.pennies)?;
    let _guard = store.lock()?;
    let existing = store
        .list_listings()?
        .into_iter()
        .find(|l| l.is_npc() && l.name == stock.name && l.price == price && l.category == stock.category);

    let outcome = match existing {
        Some(listing) if listing.quantity > 0 => Replenished::AlreadyStocked,
        Some(mut listing) => {
            listing.quantity = 1;
            store.put_listing(&listing)?;
            Replenished::Restocked
        }
        None => {
            let mut listing = ListingRecord::new(&stock.name, price, stock.category, 1);
            if let Some(description) = &stock.description {
                listing = listing.with_description(description);
            }
            store.put_listing(&listing)?;
            Replenished::Inserted
        }
    };
    if outcome != Replenished::AlreadyStocked {
        info!("Replenished {}: {:?}", stock.name, outcome);
    }
    Ok(outcome)
}

/// Generate `count` random listings sold by `seller` (an account username).
pub fn generate_items(
    store: &MarketStore,
    seller: &str,
    count: usize,
) -> Result<Vec<ListingRecord>, MarketError> {
    if count == 0 {
        return Err(MarketError::Validation("Count must be positive.".to_string()));
    }
    let seller_character = store.find_active_character(seller)?;
    let mut rng = rand::thread_rng();
    let listings: Vec<ListingRecord> = (0..count)
        .map(|_| {
            let template = &ITEM_TEMPLATES[rng.gen_range(0..ITEM_TEMPLATES.len())];
            ListingRecord::new(template.name, template.roll_price(&mut rng), template.category(), 1)
                .with_description(template.description)
                .sold_by(seller, seller_character.as_ref().map(|c| c.id.as_str()))
        })
        .collect();
    store.insert_listings(&listings)?;
    info!("Generated {} listings for {}", listings.len(), seller);
    Ok(listings)
}

/// Multi-line shop summary for the console and the `status` command.
pub fn format_stock_summary(listings: &[ListingRecord]) -> Vec<String> {
    let npc: Vec<&ListingRecord> = listings.iter().filter(|l| l.is_npc()).collect();
    if npc.is_empty() {
        return vec!["The shop has no stock.".to_string()];
    }
    let mut lines = vec![format!("=== Shop stock ({}) ===", npc.len())];
    for l in npc {
        let stock = if l.quantity == 0 {
            "sold out".to_string()
        } else {
            format!("x{}", l.quantity)
        };
        lines.push(format!("{} - {} ({})", l.name, l.price, stock));
    }
    lines
}
