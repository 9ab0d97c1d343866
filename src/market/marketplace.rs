//! Marketplace flows and listing views.
//!
//! Sale input is validated here before any store procedure runs. Views are
//! re-fetched from the store after every mutation; nothing is cached.

use log::{debug, info};

use crate::logutil::escape_log;
use crate::market::currency::{Money, PENNIES_PER_CROWN};
use crate::market::errors::MarketError;
use crate::market::storage::{MarketStore, Purchase};
use crate::market::types::{
    Category, CategoryFilter, CharacterItem, CharacterRecord, ListingRecord, ListingView,
    SaleRequest,
};
use crate::metrics;

pub const UNKNOWN_SELLER: &str = "Unknown Adventurer";
pub const UNKNOWN_CRAFTER: &str = "Unknown Crafter";

/// Check a sell form before anything is written.
///
/// `owned` is the size of the stack being sold from.
pub fn validate_sale(
    crowns: u64,
    pennies: u64,
    category: Option<&str>,
    quantity: u32,
    owned: u32,
) -> Result<SaleRequest, MarketError> {
    if crowns == 0 && pennies == 0 {
        return Err(MarketError::Validation("Price cannot be zero.".to_string()));
    }
    if pennies >= PENNIES_PER_CROWN {
        return Err(MarketError::Validation(
            "Pennies must be less than 12. Please convert 12 pennies to 1 Crown.".to_string(),
        ));
    }
    let category = match category.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => c.parse::<Category>().map_err(MarketError::Validation)?,
        None => {
            return Err(MarketError::Validation(
                "Please select a category.".to_string(),
            ))
        }
    };
    if quantity == 0 || quantity > owned {
        return Err(MarketError::Validation(format!(
            "Quantity to sell must be between 1 and {}.",
            owned
        )));
    }
    Ok(SaleRequest {
        price: Money::new(crowns, pennies)?,
        category,
        quantity,
    })
}

/// Buy one unit of a listing.
pub fn buy(
    store: &MarketStore,
    buyer: &CharacterRecord,
    listing_id: &str,
) -> Result<Purchase, MarketError> {
    let purchase = store.transfer_item_from_marketplace(listing_id, &buyer.id)?;
    metrics::inc_purchases();
    info!(
        "{} bought {} for {}",
        escape_log(&buyer.name),
        escape_log(&purchase.item_name),
        purchase.price
    );
    Ok(purchase)
}

/// Validate and list part of an item stack.
pub fn sell(
    store: &MarketStore,
    seller: &CharacterRecord,
    item: &CharacterItem,
    crowns: u64,
    pennies: u64,
    category: Option<&str>,
    quantity: u32,
) -> Result<ListingRecord, MarketError> {
    let sale = validate_sale(crowns, pennies, category, quantity, item.quantity)?;
    let listing = store.transfer_item_to_marketplace(&seller.id, &item.id, &sale)?;
    metrics::inc_sales();
    info!(
        "{} listed {} x{} at {}",
        escape_log(&seller.name),
        escape_log(&listing.name),
        listing.quantity,
        listing.price
    );
    Ok(listing)
}

pub fn delist(
    store: &MarketStore,
    seller: &CharacterRecord,
    listing_id: &str,
) -> Result<CharacterItem, MarketError> {
    let item = store.delist_item(listing_id, &seller.id)?;
    metrics::inc_delists();
    debug!("{} delisted {}", escape_log(&seller.name), listing_id);
    Ok(item)
}

/// Resolve the character behind a listing: the recorded seller character if still
/// active, otherwise the seller user's current character.
fn seller_character(
    store: &MarketStore,
    listing: &ListingRecord,
) -> Result<Option<CharacterRecord>, MarketError> {
    if let Some(id) = &listing.seller_character {
        if let Some(c) = store.get_character(id)?.filter(|c| c.is_active()) {
            return Ok(Some(c));
        }
    }
    match &listing.seller_user {
        Some(user) => store.find_active_character(user),
        None => Ok(None),
    }
}

fn crafter_name(store: &MarketStore, listing: &ListingRecord) -> Result<String, MarketError> {
    let name = match &listing.crafter_user {
        Some(user) => store.find_active_character(user)?.map(|c| c.name),
        None => None,
    };
    Ok(name.unwrap_or_else(|| UNKNOWN_CRAFTER.to_string()))
}

fn enrich(store: &MarketStore, listing: ListingRecord) -> Result<ListingView, MarketError> {
    let seller_name = seller_character(store, &listing)?
        .map(|c| c.name)
        .unwrap_or_else(|| UNKNOWN_SELLER.to_string());
    let crafter_name = crafter_name(store, &listing)?;
    Ok(ListingView {
        listing,
        seller_name,
        crafter_name,
    })
}

/// Every listing, newest first.
pub fn global_listings(
    store: &MarketStore,
    filter: CategoryFilter,
) -> Result<Vec<ListingView>, MarketError> {
    store
        .list_listings()?
        .into_iter()
        .filter(|l| filter.matches(l.category))
        .map(|l| enrich(store, l))
        .collect()
}

/// Listings whose seller belongs to the viewer's branch.
pub fn local_listings(
    store: &MarketStore,
    viewer: &CharacterRecord,
    filter: CategoryFilter,
) -> Result<Vec<ListingView>, MarketError> {
    let mut out = Vec::new();
    for listing in store.list_listings()? {
        if !filter.matches(listing.category) {
            continue;
        }
        let Some(seller) = seller_character(store, &listing)? else {
            continue;
        };
        if seller.branch != viewer.branch {
            continue;
        }
        let crafter_name = crafter_name(store, &listing)?;
        out.push(ListingView {
            listing,
            seller_name: seller.name,
            crafter_name,
        });
    }
    Ok(out)
}

/// The newest `limit` listings for the home page.
pub fn latest_listings(store: &MarketStore, limit: usize) -> Result<Vec<ListingRecord>, MarketError> {
    let mut listings = store.list_listings()?;
    listings.truncate(limit);
    Ok(listings)
}
