use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::currency::Money;

pub const CHARACTER_SCHEMA_VERSION: u8 = 1;
pub const LISTING_SCHEMA_VERSION: u8 = 1;
pub const ITEM_SCHEMA_VERSION: u8 = 1;
pub const PERMIT_SCHEMA_VERSION: u8 = 1;

/// Permit tag that unlocks the blacksmith page.
pub const BLACKSMITH_PERMIT: &str = "blacksmith";

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Capitalise the first letter for display ("half elf" -> "Half elf").
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Race {
    Human,
    Elf,
    HalfElf,
    Dwarf,
    Halfling,
}

impl Race {
    pub const ALL: [Race; 5] = [
        Race::Human,
        Race::Elf,
        Race::HalfElf,
        Race::Dwarf,
        Race::Halfling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Race::Human => "human",
            Race::Elf => "elf",
            Race::HalfElf => "half elf",
            Race::Dwarf => "dwarf",
            Race::Halfling => "halfling",
        }
    }
}

impl FromStr for Race {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        Race::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == norm)
            .ok_or_else(|| format!("Unknown race '{}'", s.trim()))
    }
}

impl fmt::Display for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Guild {
    Mercenary,
    Scout,
    /// Accepted from seeds and admin tools; not offered at character creation.
    Blacksmith,
}

impl Guild {
    /// Guilds a player may pick when creating a character.
    pub const SELECTABLE: [Guild; 2] = [Guild::Mercenary, Guild::Scout];

    pub fn as_str(&self) -> &'static str {
        match self {
            Guild::Mercenary => "mercenary",
            Guild::Scout => "scout",
            Guild::Blacksmith => "blacksmith",
        }
    }
}

impl FromStr for Guild {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mercenary" => Ok(Guild::Mercenary),
            "scout" => Ok(Guild::Scout),
            "blacksmith" => Ok(Guild::Blacksmith),
            other => Err(format!("Unknown guild '{}'", other)),
        }
    }
}

impl fmt::Display for Guild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Weapons,
    Armour,
    Misc,
    Consumable,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Weapons,
        Category::Armour,
        Category::Misc,
        Category::Consumable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Weapons => "weapons",
            Category::Armour => "armour",
            Category::Misc => "misc",
            Category::Consumable => "consumable",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weapons" | "weapon" => Ok(Category::Weapons),
            "armour" | "armor" => Ok(Category::Armour),
            "misc" => Ok(Category::Misc),
            "consumable" | "consumables" => Ok(Category::Consumable),
            other => Err(format!("Unknown category '{}'", other)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing filter used by the marketplace views; `All` disables filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(&self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(c) => *c == category,
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CategoryFilter::All);
        }
        s.parse::<Category>().map(CategoryFilter::Only)
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::All => f.write_str("all"),
            CategoryFilter::Only(c) => write!(f, "{}", c),
        }
    }
}

/// A player character. Retired and dead characters keep the same shape in the archives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterRecord {
    pub id: String,
    /// Owning account username (lowercased)
    pub user: String,
    pub name: String,
    pub race: Race,
    pub guild: Guild,
    pub branch: String,
    pub guild_rank: String,
    pub money: Money,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub died_at: Option<DateTime<Utc>>,
    pub schema_version: u8,
}

impl CharacterRecord {
    pub fn new(user: &str, name: &str, race: Race, guild: Guild, branch: &str) -> Self {
        Self {
            id: new_id(),
            user: user.to_ascii_lowercase(),
            name: name.trim().to_string(),
            race,
            guild,
            branch: branch.to_string(),
            guild_rank: "recruit".to_string(),
            money: Money::ZERO,
            created_at: Utc::now(),
            retired_at: None,
            died_at: None,
            schema_version: CHARACTER_SCHEMA_VERSION,
        }
    }

    pub fn with_money(mut self, money: Money) -> Self {
        self.money = money;
        self
    }

    /// Neither retired nor dead.
    pub fn is_active(&self) -> bool {
        self.retired_at.is_none() && self.died_at.is_none()
    }
}

/// A marketplace row offering `quantity` units at `price` each.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub category: Category,
    pub quantity: u32,
    /// None for system-stocked (NPC) listings
    pub seller_user: Option<String>,
    pub seller_character: Option<String>,
    pub crafter_user: Option<String>,
    pub required_permit: Option<String>,
    pub listed_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl ListingRecord {
    pub fn new(name: &str, price: Money, category: Category, quantity: u32) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            description: None,
            price,
            category,
            quantity,
            seller_user: None,
            seller_character: None,
            crafter_user: None,
            required_permit: None,
            listed_at: Utc::now(),
            schema_version: LISTING_SCHEMA_VERSION,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn sold_by(mut self, user: &str, character_id: Option<&str>) -> Self {
        self.seller_user = Some(user.to_ascii_lowercase());
        self.seller_character = character_id.map(|s| s.to_string());
        self
    }

    pub fn requiring(mut self, permit: &str) -> Self {
        self.required_permit = Some(permit.to_string());
        self
    }

    pub fn is_npc(&self) -> bool {
        self.seller_user.is_none()
    }
}

/// One stack of items in a character's inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterItem {
    pub id: String,
    pub character_id: String,
    pub item_name: String,
    pub quantity: u32,
    pub acquired_at: DateTime<Utc>,
    pub crafter_user: Option<String>,
    pub schema_version: u8,
}

impl CharacterItem {
    pub fn new(character_id: &str, item_name: &str, quantity: u32, crafter: Option<&str>) -> Self {
        Self {
            id: new_id(),
            character_id: character_id.to_string(),
            item_name: item_name.to_string(),
            quantity,
            acquired_at: Utc::now(),
            crafter_user: crafter.map(|s| s.to_string()),
            schema_version: ITEM_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermitRecord {
    pub id: String,
    pub character_id: String,
    pub permit: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl PermitRecord {
    pub fn new(character_id: &str, permit: &str) -> Self {
        Self {
            id: new_id(),
            character_id: character_id.to_string(),
            permit: permit.trim().to_ascii_lowercase(),
            created_at: Utc::now(),
            schema_version: PERMIT_SCHEMA_VERSION,
        }
    }
}

/// A validated request to list part of an item stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleRequest {
    pub price: Money,
    pub category: Category,
    pub quantity: u32,
}

/// A listing joined with the display names the marketplace pages show.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingView {
    pub listing: ListingRecord,
    pub seller_name: String,
    pub crafter_name: String,
}
