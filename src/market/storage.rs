use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info, warn};
use sled::transaction::ConflictableTransactionError;
use sled::{IVec, Transactional};

use crate::logutil::escape_log;
use crate::market::currency::{settle_purchase, Money};
use crate::market::errors::MarketError;
use crate::market::types::{
    CharacterItem, CharacterRecord, ListingRecord, PermitRecord, SaleRequest,
    CHARACTER_SCHEMA_VERSION, ITEM_SCHEMA_VERSION, LISTING_SCHEMA_VERSION,
    PERMIT_SCHEMA_VERSION,
};

const TREE_CHARACTERS: &str = "market_characters";
const TREE_OWNERS: &str = "market_character_owners";
const TREE_RETIRED: &str = "market_retired";
const TREE_DEAD: &str = "market_dead";
const TREE_ITEMS: &str = "market_items";
const TREE_PERMITS: &str = "market_permits";
const TREE_LISTINGS: &str = "market_listings";
const TREE_LOGS: &str = "market_logs";

/// Log entries kept before the oldest are dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;
/// The log is trimmed once every this many appends.
pub const LOG_TRIM_EVERY: u64 = 64;

const EMPTY: &[u8] = &[];

type TxResult<T> = Result<T, ConflictableTransactionError<MarketError>>;

fn next_timestamp_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1000)
}

/// Records stored with a schema version byte.
trait Versioned: serde::Serialize + serde::de::DeserializeOwned {
    const ENTITY: &'static str;
    const VERSION: u8;
    fn schema_version(&self) -> u8;
}

impl Versioned for CharacterRecord {
    const ENTITY: &'static str = "character";
    const VERSION: u8 = CHARACTER_SCHEMA_VERSION;
    fn schema_version(&self) -> u8 {
        self.schema_version
    }
}

impl Versioned for ListingRecord {
    const ENTITY: &'static str = "listing";
    const VERSION: u8 = LISTING_SCHEMA_VERSION;
    fn schema_version(&self) -> u8 {
        self.schema_version
    }
}

impl Versioned for CharacterItem {
    const ENTITY: &'static str = "item";
    const VERSION: u8 = ITEM_SCHEMA_VERSION;
    fn schema_version(&self) -> u8 {
        self.schema_version
    }
}

impl Versioned for PermitRecord {
    const ENTITY: &'static str = "permit";
    const VERSION: u8 = PERMIT_SCHEMA_VERSION;
    fn schema_version(&self) -> u8 {
        self.schema_version
    }
}

/// Outcome of a completed purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub item_name: String,
    pub price: Money,
    pub buyer_balance: Money,
    pub remaining: u32,
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct MarketStoreBuilder {
    path: PathBuf,
    log_capacity: usize,
}

impl MarketStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    pub fn log_capacity(mut self, entries: usize) -> Self {
        self.log_capacity = entries;
        self
    }

    pub fn open(self) -> Result<MarketStore, MarketError> {
        MarketStore::open_with(self.path, self.log_capacity)
    }
}

/// Sled-backed persistence for characters, inventories, permits and listings.
///
/// Multi-record procedures (buy, sell, delist, retire, kill, create) read and decode
/// everything they need first, then commit their writes in one sled transaction.
/// A write lock keeps the procedures from interleaving.
///
/// Keys are laid out per owner: `user:character_id` in the owner index,
/// `character_id:item_id` for item stacks and `character_id:permit` for permits,
/// so a lookup only decodes its owner's rows.
pub struct MarketStore {
    db: sled::Db,
    characters: sled::Tree,
    owners: sled::Tree,
    retired: sled::Tree,
    dead: sled::Tree,
    items: sled::Tree,
    permits: sled::Tree,
    listings: sled::Tree,
    logs: sled::Tree,
    log_capacity: usize,
    write_lock: Mutex<()>,
}

impl MarketStore {
    /// Open (or create) the market store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MarketError> {
        Self::open_with(path, DEFAULT_LOG_CAPACITY)
    }

    fn open_with<P: AsRef<Path>>(path: P, log_capacity: usize) -> Result<Self, MarketError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let store = Self {
            characters: db.open_tree(TREE_CHARACTERS)?,
            owners: db.open_tree(TREE_OWNERS)?,
            retired: db.open_tree(TREE_RETIRED)?,
            dead: db.open_tree(TREE_DEAD)?,
            items: db.open_tree(TREE_ITEMS)?,
            permits: db.open_tree(TREE_PERMITS)?,
            listings: db.open_tree(TREE_LISTINGS)?,
            logs: db.open_tree(TREE_LOGS)?,
            db,
            log_capacity,
            write_lock: Mutex::new(()),
        };
        debug!("Opened market store at {}", path_ref.display());
        Ok(store)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ()>, MarketError> {
        self.write_lock
            .lock()
            .map_err(|_| MarketError::Internal("market write lock poisoned".to_string()))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, MarketError> {
        Ok(bincode::serialize(value)?)
    }

    fn decode<T: Versioned>(bytes: IVec) -> Result<T, MarketError> {
        let record: T = bincode::deserialize(&bytes)?;
        if record.schema_version() != T::VERSION {
            return Err(MarketError::SchemaMismatch {
                entity: T::ENTITY,
                expected: T::VERSION,
                found: record.schema_version(),
            });
        }
        Ok(record)
    }

    /// Decode every row under `prefix`; the first unreadable row fails the scan.
    fn scan<T: Versioned>(tree: &sled::Tree, prefix: &[u8]) -> Result<Vec<T>, MarketError> {
        tree.scan_prefix(prefix)
            .map(|entry| {
                entry
                    .map_err(MarketError::from)
                    .and_then(|(_key, value)| Self::decode(value))
            })
            .collect()
    }

    /// Decode a whole tree, skipping rows that cannot be read.
    fn scan_readable<T: Versioned>(tree: &sled::Tree) -> Result<Vec<T>, MarketError> {
        let mut records = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            match Self::decode(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable {} {}: {}",
                    T::ENTITY,
                    escape_log(&String::from_utf8_lossy(&key)),
                    e
                ),
            }
        }
        Ok(records)
    }

    fn owner_key(user: &str, character_id: &str) -> Vec<u8> {
        format!("{}:{}", user.to_ascii_lowercase(), character_id).into_bytes()
    }

    fn item_key(character_id: &str, item_id: &str) -> Vec<u8> {
        format!("{}:{}", character_id, item_id).into_bytes()
    }

    fn permit_key(character_id: &str, permit: &str) -> Vec<u8> {
        format!("{}:{}", character_id, permit.to_ascii_lowercase()).into_bytes()
    }

    // ------------------------------------------------------------------
    // Characters
    // ------------------------------------------------------------------

    /// Insert or update an active character record.
    pub fn put_character(&self, character: &CharacterRecord) -> Result<(), MarketError> {
        let bytes = Self::serialize(character)?;
        let owner = Self::owner_key(&character.user, &character.id);
        (&self.characters, &self.owners).transaction(|(characters, owners)| -> TxResult<()> {
            characters.insert(character.id.as_bytes(), bytes.as_slice())?;
            owners.insert(owner.as_slice(), EMPTY)?;
            Ok(())
        })?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_character(&self, id: &str) -> Result<Option<CharacterRecord>, MarketError> {
        match self.characters.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// All readable characters that are neither retired nor dead.
    pub fn list_active_characters(&self) -> Result<Vec<CharacterRecord>, MarketError> {
        let mut all: Vec<CharacterRecord> = Self::scan_readable(&self.characters)?;
        all.retain(|c| c.is_active());
        Ok(all)
    }

    /// The user's active character, if any. Absence is not an error; an unreadable
    /// record of this user is.
    pub fn find_active_character(&self, user: &str) -> Result<Option<CharacterRecord>, MarketError> {
        let prefix = format!("{}:", user.to_ascii_lowercase());
        let mut newest: Option<CharacterRecord> = None;
        for entry in self.owners.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let Some(bytes) = self.characters.get(&key[prefix.len()..])? else {
                continue;
            };
            let character: CharacterRecord = Self::decode(bytes)?;
            if character.is_active()
                && newest
                    .as_ref()
                    .map_or(true, |n| character.created_at > n.created_at)
            {
                newest = Some(character);
            }
        }
        Ok(newest)
    }

    pub fn list_retired_characters(&self) -> Result<Vec<CharacterRecord>, MarketError> {
        Self::scan_readable(&self.retired)
    }

    /// Dead characters, most recent death first.
    pub fn list_dead_characters(&self) -> Result<Vec<CharacterRecord>, MarketError> {
        let mut dead: Vec<CharacterRecord> = Self::scan_readable(&self.dead)?;
        dead.sort_by(|a, b| b.died_at.cmp(&a.died_at));
        Ok(dead)
    }

    /// Create a character and its starting permits, enforcing one active character per
    /// user unless `allow_multiple` is set (bulk seeding tools).
    pub fn create_character(
        &self,
        character: &CharacterRecord,
        permits: &[String],
        allow_multiple: bool,
    ) -> Result<(), MarketError> {
        let _guard = self.lock()?;
        if !allow_multiple && self.find_active_character(&character.user)?.is_some() {
            return Err(MarketError::ActiveCharacterExists(character.user.clone()));
        }
        let bytes = Self::serialize(character)?;
        let owner = Self::owner_key(&character.user, &character.id);
        let permit_rows = permits
            .iter()
            .map(|p| {
                let record = PermitRecord::new(&character.id, p);
                Ok((
                    Self::permit_key(&record.character_id, &record.permit),
                    Self::serialize(&record)?,
                ))
            })
            .collect::<Result<Vec<(Vec<u8>, Vec<u8>)>, MarketError>>()?;

        (&self.characters, &self.owners, &self.permits).transaction(
            |(characters, owners, permits)| -> TxResult<()> {
                characters.insert(character.id.as_bytes(), bytes.as_slice())?;
                owners.insert(owner.as_slice(), EMPTY)?;
                for (key, value) in &permit_rows {
                    if permits.get(key.as_slice())?.is_none() {
                        permits.insert(key.as_slice(), value.as_slice())?;
                    }
                }
                Ok(())
            },
        )?;
        self.db.flush()?;
        self.note(&format!(
            "create character={} user={} name={}",
            character.id,
            character.user,
            escape_log(&character.name)
        ));
        Ok(())
    }

    /// Add `amount` to an active character's purse.
    pub fn credit_character(&self, character_id: &str, amount: Money) -> Result<CharacterRecord, MarketError> {
        let _guard = self.lock()?;
        let mut character = self
            .get_character(character_id)?
            .filter(|c| c.is_active())
            .ok_or_else(|| MarketError::NotFound(format!("character {}", character_id)))?;
        character.money = character.money.add(&amount);
        self.put_character(&character)?;
        Ok(character)
    }

    /// Move the character into the retired archive.
    pub fn retire_character_and_move(&self, character_id: &str) -> Result<CharacterRecord, MarketError> {
        self.archive_character(character_id, false)
    }

    /// Move the character into the dead archive.
    pub fn kill_character_and_move(&self, character_id: &str) -> Result<CharacterRecord, MarketError> {
        self.archive_character(character_id, true)
    }

    fn archive_character(&self, character_id: &str, died: bool) -> Result<CharacterRecord, MarketError> {
        let _guard = self.lock()?;
        let mut character = self
            .get_character(character_id)?
            .filter(|c| c.is_active())
            .ok_or_else(|| MarketError::NotFound(format!("character {}", character_id)))?;
        let now = Utc::now();
        let archive = if died {
            character.died_at = Some(now);
            &self.dead
        } else {
            character.retired_at = Some(now);
            &self.retired
        };
        let bytes = Self::serialize(&character)?;
        let owner = Self::owner_key(&character.user, &character.id);

        (&self.characters, &self.owners, archive).transaction(
            |(characters, owners, archive)| -> TxResult<()> {
                archive.insert(character.id.as_bytes(), bytes.as_slice())?;
                characters.remove(character.id.as_bytes())?;
                owners.remove(owner.as_slice())?;
                Ok(())
            },
        )?;
        self.db.flush()?;
        self.note(&format!(
            "{} character={} user={}",
            if died { "death" } else { "retire" },
            character.id,
            character.user
        ));
        info!(
            "Character {} ({}) moved to {} archive",
            escape_log(&character.name),
            character.id,
            if died { "dead" } else { "retired" }
        );
        Ok(character)
    }

    // ------------------------------------------------------------------
    // Permits
    // ------------------------------------------------------------------

    /// Grant a permit; returns an error if the character already holds it.
    pub fn grant_permit(&self, character_id: &str, permit: &str) -> Result<PermitRecord, MarketError> {
        let _guard = self.lock()?;
        if self.get_character(character_id)?.is_none() {
            return Err(MarketError::NotFound(format!("character {}", character_id)));
        }
        let record = PermitRecord::new(character_id, permit);
        let key = Self::permit_key(character_id, &record.permit);
        if self.permits.contains_key(&key)? {
            return Err(MarketError::Validation(format!(
                "Character already holds a {} permit.",
                record.permit
            )));
        }
        self.permits.insert(key, Self::serialize(&record)?)?;
        self.permits.flush()?;
        self.note(&format!("permit character={} permit={}", character_id, record.permit));
        Ok(record)
    }

    pub fn list_permits(&self, character_id: &str) -> Result<Vec<PermitRecord>, MarketError> {
        let prefix = format!("{}:", character_id);
        Self::scan(&self.permits, prefix.as_bytes())
    }

    pub fn has_permit(&self, character_id: &str, permit: &str) -> Result<bool, MarketError> {
        Ok(self.permits.contains_key(Self::permit_key(character_id, permit))?)
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub fn put_item(&self, item: &CharacterItem) -> Result<(), MarketError> {
        self.items.insert(
            Self::item_key(&item.character_id, &item.id),
            Self::serialize(item)?,
        )?;
        self.items.flush()?;
        Ok(())
    }

    pub fn get_item(&self, character_id: &str, item_id: &str) -> Result<Option<CharacterItem>, MarketError> {
        match self.items.get(Self::item_key(character_id, item_id))? {
            Some(bytes) => Ok(Some(Self::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// A character's item stacks, most recently acquired first.
    pub fn list_items(&self, character_id: &str) -> Result<Vec<CharacterItem>, MarketError> {
        let prefix = format!("{}:", character_id);
        let mut items: Vec<CharacterItem> = Self::scan(&self.items, prefix.as_bytes())?;
        items.sort_by(|a, b| b.acquired_at.cmp(&a.acquired_at));
        Ok(items)
    }

    /// The stack `quantity` units land in: the matching stack (same name and
    /// crafter) grown, or a new one. Nothing is written.
    fn stacked(
        &self,
        character_id: &str,
        item_name: &str,
        quantity: u32,
        crafter: Option<&str>,
    ) -> Result<CharacterItem, MarketError> {
        let existing = self.list_items(character_id)?.into_iter().find(|i| {
            i.item_name == item_name && i.crafter_user.as_deref() == crafter
        });
        Ok(match existing {
            Some(mut stack) => {
                stack.quantity = stack.quantity.saturating_add(quantity);
                stack.acquired_at = Utc::now();
                stack
            }
            None => CharacterItem::new(character_id, item_name, quantity, crafter),
        })
    }

    /// Give a character items directly (seeding and admin tools).
    pub fn give_item(
        &self,
        character_id: &str,
        item_name: &str,
        quantity: u32,
        crafter: Option<&str>,
    ) -> Result<CharacterItem, MarketError> {
        let _guard = self.lock()?;
        let item = self.stacked(character_id, item_name, quantity, crafter)?;
        self.put_item(&item)?;
        Ok(item)
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    pub fn put_listing(&self, listing: &ListingRecord) -> Result<(), MarketError> {
        self.listings
            .insert(listing.id.as_bytes(), Self::serialize(listing)?)?;
        self.listings.flush()?;
        Ok(())
    }

    pub fn get_listing(&self, listing_id: &str) -> Result<Option<ListingRecord>, MarketError> {
        match self.listings.get(listing_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// All readable listings, newest first.
    pub fn list_listings(&self) -> Result<Vec<ListingRecord>, MarketError> {
        let mut listings: Vec<ListingRecord> = Self::scan_readable(&self.listings)?;
        listings.sort_by(|a, b| b.listed_at.cmp(&a.listed_at));
        Ok(listings)
    }

    /// Insert a batch of listings in one locked step.
    pub fn insert_listings(&self, listings: &[ListingRecord]) -> Result<usize, MarketError> {
        let _guard = self.lock()?;
        let rows = listings
            .iter()
            .map(|l| Ok((l.id.as_bytes().to_vec(), Self::serialize(l)?)))
            .collect::<Result<Vec<(Vec<u8>, Vec<u8>)>, MarketError>>()?;
        self.listings.transaction(|tree| -> TxResult<()> {
            for (key, value) in &rows {
                tree.insert(key.as_slice(), value.as_slice())?;
            }
            Ok(())
        })?;
        self.listings.flush()?;
        Ok(listings.len())
    }

    /// Buy one unit of a listing for the buyer character.
    pub fn transfer_item_from_marketplace(
        &self,
        listing_id: &str,
        buyer_character_id: &str,
    ) -> Result<Purchase, MarketError> {
        let _guard = self.lock()?;
        let mut listing = self
            .get_listing(listing_id)?
            .ok_or_else(|| MarketError::NotFound(format!("listing {}", listing_id)))?;
        if listing.quantity == 0 {
            return Err(MarketError::Validation(format!("{} is out of stock.", listing.name)));
        }
        let mut buyer = self
            .get_character(buyer_character_id)?
            .filter(|c| c.is_active())
            .ok_or_else(|| MarketError::NotFound(format!("character {}", buyer_character_id)))?;

        if listing.seller_user.as_deref() == Some(buyer.user.as_str()) {
            return Err(MarketError::PermissionDenied(
                "you cannot buy your own listing".to_string(),
            ));
        }
        if let Some(permit) = &listing.required_permit {
            if !self.has_permit(&buyer.id, permit)? {
                return Err(MarketError::PermitRequired(permit.clone()));
            }
        }

        buyer.money = settle_purchase(&buyer.money, &listing.price)?;

        let listed_by = match &listing.seller_character {
            Some(id) => self.get_character(id)?.filter(|c| c.is_active()),
            None => None,
        };
        let seller = match (listed_by, &listing.seller_user) {
            (Some(c), _) => Some(c),
            (None, Some(user)) => self.find_active_character(user)?,
            (None, None) => None,
        };
        let stack = self.stacked(&buyer.id, &listing.name, 1, listing.crafter_user.as_deref())?;
        listing.quantity -= 1;

        let buyer_bytes = Self::serialize(&buyer)?;
        let seller_row = match seller {
            Some(mut seller) => {
                seller.money = seller.money.add(&listing.price);
                Some((seller.id.clone(), Self::serialize(&seller)?))
            }
            None => None,
        };
        let stack_key = Self::item_key(&stack.character_id, &stack.id);
        let stack_bytes = Self::serialize(&stack)?;
        // Player listings disappear when sold out; NPC listings wait for a restock.
        let listing_bytes = if listing.quantity == 0 && !listing.is_npc() {
            None
        } else {
            Some(Self::serialize(&listing)?)
        };

        (&self.characters, &self.items, &self.listings).transaction(
            |(characters, items, listings)| -> TxResult<()> {
                characters.insert(buyer.id.as_bytes(), buyer_bytes.as_slice())?;
                if let Some((id, bytes)) = &seller_row {
                    characters.insert(id.as_bytes(), bytes.as_slice())?;
                }
                items.insert(stack_key.as_slice(), stack_bytes.as_slice())?;
                match &listing_bytes {
                    Some(bytes) => listings.insert(listing.id.as_bytes(), bytes.as_slice())?,
                    None => listings.remove(listing.id.as_bytes())?,
                };
                Ok(())
            },
        )?;
        self.db.flush()?;

        self.note(&format!(
            "buy listing={} buyer={} price={}",
            listing.id, buyer.id, listing.price
        ));

        Ok(Purchase {
            item_name: listing.name,
            price: listing.price,
            buyer_balance: buyer.money,
            remaining: listing.quantity,
        })
    }

    /// List part of a character's item stack on the marketplace.
    pub fn transfer_item_to_marketplace(
        &self,
        character_id: &str,
        character_item_id: &str,
        sale: &SaleRequest,
    ) -> Result<ListingRecord, MarketError> {
        let _guard = self.lock()?;
        let seller = self
            .get_character(character_id)?
            .filter(|c| c.is_active())
            .ok_or_else(|| MarketError::NotFound(format!("character {}", character_id)))?;
        let mut item = self
            .get_item(&seller.id, character_item_id)?
            .ok_or_else(|| MarketError::NotFound(format!("item {}", character_item_id)))?;

        if sale.quantity == 0 || sale.quantity > item.quantity {
            return Err(MarketError::Validation(format!(
                "Quantity to sell must be between 1 and {}.",
                item.quantity
            )));
        }

        let mut listing = ListingRecord::new(&item.item_name, sale.price, sale.category, sale.quantity)
            .sold_by(&seller.user, Some(&seller.id));
        listing.crafter_user = item.crafter_user.clone();

        item.quantity -= sale.quantity;
        let item_key = Self::item_key(&seller.id, &item.id);
        let item_bytes = if item.quantity == 0 {
            None
        } else {
            Some(Self::serialize(&item)?)
        };
        let listing_bytes = Self::serialize(&listing)?;

        (&self.items, &self.listings).transaction(|(items, listings)| -> TxResult<()> {
            match &item_bytes {
                Some(bytes) => items.insert(item_key.as_slice(), bytes.as_slice())?,
                None => items.remove(item_key.as_slice())?,
            };
            listings.insert(listing.id.as_bytes(), listing_bytes.as_slice())?;
            Ok(())
        })?;
        self.db.flush()?;

        self.note(&format!(
            "sell listing={} seller={} qty={} price={}",
            listing.id, seller.id, listing.quantity, listing.price
        ));
        Ok(listing)
    }

    /// Withdraw a listing, returning its remaining units to the seller.
    pub fn delist_item(&self, listing_id: &str, character_id: &str) -> Result<CharacterItem, MarketError> {
        let _guard = self.lock()?;
        let listing = self
            .get_listing(listing_id)?
            .ok_or_else(|| MarketError::NotFound(format!("listing {}", listing_id)))?;
        let character = self
            .get_character(character_id)?
            .filter(|c| c.is_active())
            .ok_or_else(|| MarketError::NotFound(format!("character {}", character_id)))?;

        let owns = match &listing.seller_character {
            Some(id) => *id == character.id,
            None => listing.seller_user.as_deref() == Some(character.user.as_str()),
        };
        if !owns {
            return Err(MarketError::PermissionDenied(
                "only the seller may delist this item".to_string(),
            ));
        }

        let item = self.stacked(
            &character.id,
            &listing.name,
            listing.quantity,
            listing.crafter_user.as_deref(),
        )?;
        let item_key = Self::item_key(&character.id, &item.id);
        let item_bytes = Self::serialize(&item)?;

        (&self.items, &self.listings).transaction(|(items, listings)| -> TxResult<()> {
            items.insert(item_key.as_slice(), item_bytes.as_slice())?;
            listings.remove(listing.id.as_bytes())?;
            Ok(())
        })?;
        self.db.flush()?;

        self.note(&format!(
            "delist listing={} seller={} qty={}",
            listing.id, character.id, listing.quantity
        ));
        Ok(item)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Append a line to the market transaction log tree. Keys carry a sequence number
    /// so entries written in the same instant stay apart.
    pub fn append_log(&self, message: &str) -> Result<(), MarketError> {
        let seq = self.db.generate_id()?;
        let key = format!("logs:{:020}:{:020}", next_timestamp_nanos(), seq).into_bytes();
        self.logs.insert(key, message.as_bytes())?;
        if seq % LOG_TRIM_EVERY == 0 {
            self.trim_logs()?;
        }
        self.logs.flush()?;
        Ok(())
    }

    /// Drop the oldest entries beyond the log capacity.
    fn trim_logs(&self) -> Result<usize, MarketError> {
        let excess = self.logs.len().saturating_sub(self.log_capacity);
        for _ in 0..excess {
            self.logs.pop_min()?;
        }
        if excess > 0 {
            debug!("Trimmed {} market log entries", excess);
        }
        Ok(excess)
    }

    /// Log lines are bookkeeping: a failure here never undoes a committed procedure.
    fn note(&self, message: &str) {
        if let Err(e) = self.append_log(message) {
            warn!("Could not record market log entry: {}", e);
        }
    }

    /// Most recent log lines, newest first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<String>, MarketError> {
        self.logs
            .scan_prefix(b"logs:")
            .rev()
            .take(limit)
            .map(|entry| {
                let (_key, value) = entry?;
                Ok(std::str::from_utf8(&value)
                    .map_err(|e| MarketError::Internal(e.to_string()))?
                    .to_string())
            })
            .collect()
    }

    pub fn log_len(&self) -> usize {
        self.logs.len()
    }

    /// (active characters, dead characters, listings)
    pub fn counts(&self) -> Result<(usize, usize, usize), MarketError> {
        Ok((
            self.list_active_characters()?.len(),
            self.dead.len(),
            self.listings.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::{Category, Guild, Race};
    use tempfile::TempDir;

    fn store() -> (TempDir, MarketStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = MarketStoreBuilder::new(dir.path()).open().expect("store");
        (dir, store)
    }

    fn character(store: &MarketStore, user: &str, money: Money) -> CharacterRecord {
        let c = CharacterRecord::new(user, user, Race::Human, Guild::Mercenary, "Portsmouth")
            .with_money(money);
        store.create_character(&c, &[], false).expect("create");
        c
    }

    #[test]
    fn store_round_trip_character() {
        let (_dir, store) = store();
        let c = character(&store, "alice", Money::new(3, 10).unwrap());
        let fetched = store.get_character(&c.id).unwrap().expect("present");
        assert_eq!(fetched, c);
        let active = store.find_active_character("ALICE").unwrap().expect("active");
        assert_eq!(active.id, c.id);
    }

    #[test]
    fn second_active_character_is_rejected() {
        let (_dir, store) = store();
        character(&store, "alice", Money::ZERO);
        let again = CharacterRecord::new("alice", "Other", Race::Elf, Guild::Scout, "Guildford");
        assert!(matches!(
            store.create_character(&again, &[], false),
            Err(MarketError::ActiveCharacterExists(_))
        ));
    }

    #[test]
    fn buy_moves_money_and_item() {
        let (_dir, store) = store();
        let seller = character(&store, "seller", Money::ZERO);
        let buyer = character(&store, "buyer", Money::new(3, 10).unwrap());
        let listing = ListingRecord::new("Dagger", Money::new(2, 4).unwrap(), Category::Weapons, 1)
            .sold_by("seller", Some(&seller.id));
        store.put_listing(&listing).unwrap();

        let purchase = store
            .transfer_item_from_marketplace(&listing.id, &buyer.id)
            .expect("purchase");
        assert_eq!(purchase.buyer_balance, Money::new(1, 6).unwrap());
        assert_eq!(purchase.remaining, 0);
        assert!(store.get_listing(&listing.id).unwrap().is_none());

        let seller_after = store.get_character(&seller.id).unwrap().unwrap();
        assert_eq!(seller_after.money, Money::new(2, 4).unwrap());
        let items = store.list_items(&buyer.id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_name, "Dagger");
    }

    #[test]
    fn unaffordable_buy_leaves_everything_untouched() {
        let (_dir, store) = store();
        let buyer = character(&store, "buyer", Money::new(1, 0).unwrap());
        let listing = ListingRecord::new("Orb", Money::new(30, 0).unwrap(), Category::Misc, 1);
        store.put_listing(&listing).unwrap();

        let err = store
            .transfer_item_from_marketplace(&listing.id, &buyer.id)
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientFunds));
        assert_eq!(
            store.get_character(&buyer.id).unwrap().unwrap().money,
            Money::new(1, 0).unwrap()
        );
        assert_eq!(store.get_listing(&listing.id).unwrap().unwrap().quantity, 1);
        assert!(store.list_items(&buyer.id).unwrap().is_empty());
    }

    #[test]
    fn npc_listing_stays_at_zero_quantity() {
        let (_dir, store) = store();
        let buyer = character(&store, "buyer", Money::new(10, 0).unwrap());
        let listing = ListingRecord::new("Shortsword", Money::new(4, 6).unwrap(), Category::Weapons, 1);
        store.put_listing(&listing).unwrap();
        store
            .transfer_item_from_marketplace(&listing.id, &buyer.id)
            .unwrap();
        let after = store.get_listing(&listing.id).unwrap().expect("kept");
        assert_eq!(after.quantity, 0);
        assert!(store
            .transfer_item_from_marketplace(&listing.id, &buyer.id)
            .is_err());
    }

    #[test]
    fn permit_gated_listing() {
        let (_dir, store) = store();
        let buyer = character(&store, "buyer", Money::new(10, 0).unwrap());
        let listing = ListingRecord::new("Longsword", Money::new(5, 0).unwrap(), Category::Weapons, 1)
            .requiring("weapon");
        store.put_listing(&listing).unwrap();
        assert!(matches!(
            store.transfer_item_from_marketplace(&listing.id, &buyer.id),
            Err(MarketError::PermitRequired(_))
        ));
        store.grant_permit(&buyer.id, "weapon").unwrap();
        assert!(store
            .transfer_item_from_marketplace(&listing.id, &buyer.id)
            .is_ok());
    }

    #[test]
    fn sell_then_delist_restores_stack() {
        let (_dir, store) = store();
        let seller = character(&store, "seller", Money::ZERO);
        let item = store.give_item(&seller.id, "Goblin Ear", 3, None).unwrap();
        let sale = SaleRequest {
            price: Money::new(0, 8).unwrap(),
            category: Category::Misc,
            quantity: 2,
        };
        let listing = store
            .transfer_item_to_marketplace(&seller.id, &item.id, &sale)
            .unwrap();
        assert_eq!(listing.quantity, 2);
        assert_eq!(store.get_item(&seller.id, &item.id).unwrap().unwrap().quantity, 1);

        let restored = store.delist_item(&listing.id, &seller.id).unwrap();
        assert_eq!(restored.quantity, 3);
        assert!(store.get_listing(&listing.id).unwrap().is_none());
    }

    #[test]
    fn archive_moves_character_out_of_active_set() {
        let (_dir, store) = store();
        let c = character(&store, "alice", Money::ZERO);
        store.kill_character_and_move(&c.id).unwrap();
        assert!(store.find_active_character("alice").unwrap().is_none());
        let dead = store.list_dead_characters().unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].died_at.is_some());
        assert!(store.retire_character_and_move(&c.id).is_err());
    }

    #[test]
    fn duplicate_permit_is_rejected() {
        let (_dir, store) = store();
        let c = character(&store, "smith", Money::ZERO);
        store.grant_permit(&c.id, "blacksmith").unwrap();
        assert!(store.grant_permit(&c.id, "Blacksmith").is_err());
        assert!(store.has_permit(&c.id, "blacksmith").unwrap());
    }

    fn corrupt_item(character_id: &str, name: &str) -> CharacterItem {
        let mut item = CharacterItem::new(character_id, name, 1, None);
        item.schema_version = ITEM_SCHEMA_VERSION + 8;
        item
    }

    #[test]
    fn failed_buy_after_validation_changes_nothing() {
        let (_dir, store) = store();
        let seller = character(&store, "seller", Money::ZERO);
        let buyer = character(&store, "buyer", Money::new(3, 10).unwrap());
        let listing = ListingRecord::new("Dagger", Money::new(2, 4).unwrap(), Category::Weapons, 1)
            .sold_by("seller", Some(&seller.id));
        store.put_listing(&listing).unwrap();
        store.put_item(&corrupt_item(&buyer.id, "Old Boot")).unwrap();

        let err = store
            .transfer_item_from_marketplace(&listing.id, &buyer.id)
            .unwrap_err();
        assert!(matches!(err, MarketError::SchemaMismatch { entity: "item", .. }));
        assert_eq!(
            store.get_character(&buyer.id).unwrap().unwrap().money,
            Money::new(3, 10).unwrap()
        );
        assert_eq!(store.get_character(&seller.id).unwrap().unwrap().money, Money::ZERO);
        assert_eq!(store.get_listing(&listing.id).unwrap().unwrap().quantity, 1);
    }

    #[test]
    fn failed_delist_keeps_the_listing() {
        let (_dir, store) = store();
        let seller = character(&store, "seller", Money::ZERO);
        let listing = ListingRecord::new("Lantern", Money::new(1, 0).unwrap(), Category::Misc, 2)
            .sold_by("seller", Some(&seller.id));
        store.put_listing(&listing).unwrap();
        store.put_item(&corrupt_item(&seller.id, "Lantern")).unwrap();

        assert!(store.delist_item(&listing.id, &seller.id).is_err());
        assert_eq!(store.get_listing(&listing.id).unwrap().unwrap().quantity, 2);
    }

    #[test]
    fn unreadable_rows_stay_with_their_owner() {
        let (_dir, store) = store();
        let alice = character(&store, "alice", Money::new(1, 0).unwrap());
        let mut broken = CharacterRecord::new("zed", "Zed", Race::Halfling, Guild::Scout, "Portsmouth");
        broken.schema_version = CHARACTER_SCHEMA_VERSION + 1;
        store.put_character(&broken).unwrap();
        store.put_item(&corrupt_item(&broken.id, "Rag")).unwrap();

        assert_eq!(store.find_active_character("alice").unwrap().unwrap().id, alice.id);
        assert!(store.list_items(&alice.id).unwrap().is_empty());
        assert!(matches!(
            store.find_active_character("zed"),
            Err(MarketError::SchemaMismatch { entity: "character", .. })
        ));
        let active = store.list_active_characters().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, alice.id);

        let again = CharacterRecord::new("bob", "Bob", Race::Dwarf, Guild::Mercenary, "Portsmouth");
        store.create_character(&again, &[], false).unwrap();
    }

    #[test]
    fn log_entries_in_the_same_instant_are_kept() {
        let (_dir, store) = store();
        store.append_log("first").unwrap();
        store.append_log("second").unwrap();
        assert_eq!(store.recent_logs(2).unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn log_is_trimmed_to_capacity() {
        let dir = TempDir::new().expect("tempdir");
        let store = MarketStoreBuilder::new(dir.path())
            .log_capacity(10)
            .open()
            .expect("store");
        for n in 0..200 {
            store.append_log(&format!("entry {}", n)).unwrap();
        }
        assert!(store.log_len() <= 10 + LOG_TRIM_EVERY as usize);
        assert_eq!(store.recent_logs(1).unwrap(), vec!["entry 199"]);
    }
}
