//! Character lifecycle: creation, earning, permits, retirement and death.
//!
//! These functions validate input and then call the single-step procedures on
//! [`MarketStore`], so every mutation either fully happens or not at all.

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::MarketConfig;
use crate::logutil::escape_log;
use crate::market::currency::Money;
use crate::market::errors::MarketError;
use crate::market::storage::MarketStore;
use crate::market::types::{CharacterRecord, Guild, PermitRecord, Race, BLACKSMITH_PERMIT};
use crate::validation::validate_character_name;

const NAME_PREFIXES: [&str; 10] = [
    "Ael", "Bor", "Cael", "Dra", "Elara", "Fen", "Gareth", "Hael", "Isolde", "Jor",
];
const NAME_SUFFIXES: [&str; 10] = [
    "dan", "ian", "wyn", "dor", "iel", "ric", "mond", "lyn", "us", "a",
];

/// Parse the race field of the create-character form.
pub fn parse_race(input: &str) -> Result<Race, MarketError> {
    if input.trim().is_empty() {
        return Err(MarketError::Validation("Please select a race.".to_string()));
    }
    input.parse().map_err(MarketError::Validation)
}

/// Parse the guild field; only player-selectable guilds are accepted.
pub fn parse_selectable_guild(input: &str) -> Result<Guild, MarketError> {
    if input.trim().is_empty() {
        return Err(MarketError::Validation("Please select a guild.".to_string()));
    }
    let guild: Guild = input.parse().map_err(MarketError::Validation)?;
    if !Guild::SELECTABLE.contains(&guild) {
        return Err(MarketError::Validation(format!(
            "The {} guild is not open to new characters.",
            guild
        )));
    }
    Ok(guild)
}

/// Create the user's active character with starting funds and guild permits.
pub fn create_character(
    store: &MarketStore,
    market: &MarketConfig,
    user: &str,
    name: &str,
    race: Race,
    guild: Guild,
) -> Result<CharacterRecord, MarketError> {
    let name = validate_character_name(name).map_err(|e| MarketError::Validation(e.to_string()))?;
    let character = CharacterRecord::new(user, &name, race, guild, &market.default_branch)
        .with_money(market.starting_money());
    let permits = market.permits_for(guild);
    store.create_character(&character, &permits, false)?;
    info!(
        "Character '{}' created for {} ({} {}, {})",
        escape_log(&character.name),
        character.user,
        character.race,
        character.guild,
        character.branch
    );
    Ok(character)
}

/// Add the configured allowance to the character's purse.
pub fn earn_pennies(
    store: &MarketStore,
    market: &MarketConfig,
    character_id: &str,
) -> Result<CharacterRecord, MarketError> {
    store.credit_character(character_id, market.earn_amount())
}

/// Grant a permit tag. Blacksmith permits are reserved for the blacksmith guild.
pub fn grant_permit(
    store: &MarketStore,
    character: &CharacterRecord,
    permit: &str,
) -> Result<PermitRecord, MarketError> {
    let tag = permit.trim().to_ascii_lowercase();
    if tag.is_empty() {
        return Err(MarketError::Validation("Please name a permit.".to_string()));
    }
    if tag == BLACKSMITH_PERMIT && character.guild != Guild::Blacksmith {
        return Err(MarketError::PermissionDenied(
            "only members of the blacksmith guild may hold a blacksmith permit".to_string(),
        ));
    }
    store.grant_permit(&character.id, &tag)
}

pub fn retire(store: &MarketStore, character_id: &str) -> Result<CharacterRecord, MarketError> {
    store.retire_character_and_move(character_id)
}

pub fn die(store: &MarketStore, character_id: &str) -> Result<CharacterRecord, MarketError> {
    store.kill_character_and_move(character_id)
}

/// Build one random character for `user`.
pub fn random_character<R: Rng + ?Sized>(
    rng: &mut R,
    user: &str,
    branches: &[String],
) -> CharacterRecord {
    let prefix = NAME_PREFIXES.choose(rng).copied().unwrap_or("Ael");
    let suffix = NAME_SUFFIXES.choose(rng).copied().unwrap_or("a");
    let race = Race::ALL.choose(rng).copied().unwrap_or(Race::Human);
    let guild = Guild::SELECTABLE
        .choose(rng)
        .copied()
        .unwrap_or(Guild::Mercenary);
    let branch = branches
        .choose(rng)
        .map(String::as_str)
        .unwrap_or("Portsmouth");
    let money = Money::normalized(rng.gen_range(10..60), rng.gen_range(0..12));
    CharacterRecord::new(user, &format!("{}{}", prefix, suffix), race, guild, branch)
        .with_money(money)
}

/// Seed `count` random characters for a user. Bypasses the one-active-character rule.
pub fn generate_characters(
    store: &MarketStore,
    market: &MarketConfig,
    user: &str,
    count: usize,
) -> Result<Vec<CharacterRecord>, MarketError> {
    if count == 0 {
        return Err(MarketError::Validation("Count must be positive.".to_string()));
    }
    let mut rng = rand::thread_rng();
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        let character = random_character(&mut rng, user, &market.branches);
        store.create_character(&character, &market.permits_for(character.guild), true)?;
        created.push(character);
    }
    info!("Generated {} characters for {}", created.len(), escape_log(user));
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::storage::MarketStoreBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MarketStore, MarketConfig) {
        let dir = TempDir::new().unwrap();
        let store = MarketStoreBuilder::new(dir.path()).open().unwrap();
        (dir, store, MarketConfig::default())
    }

    #[test]
    fn create_grants_guild_permits() {
        let (_dir, store, market) = setup();
        let c = create_character(&store, &market, "alice", "Elara", Race::Elf, Guild::Mercenary)
            .unwrap();
        assert_eq!(c.branch, "Portsmouth");
        assert!(store.has_permit(&c.id, "weapon").unwrap());
        assert!(store.has_permit(&c.id, "armour").unwrap());
    }

    #[test]
    fn create_rejects_blank_name() {
        let (_dir, store, market) = setup();
        let err = create_character(&store, &market, "alice", "   ", Race::Elf, Guild::Scout)
            .unwrap_err();
        assert_eq!(err.user_message(), "Please enter a character name.");
    }

    #[test]
    fn form_parsing() {
        assert!(parse_race("").is_err());
        assert_eq!(parse_race("Dwarf").unwrap(), Race::Dwarf);
        assert!(parse_selectable_guild("blacksmith").is_err());
        assert_eq!(parse_selectable_guild("scout").unwrap(), Guild::Scout);
    }

    #[test]
    fn earning_twice_carries_into_crowns() {
        let (_dir, store, market) = setup();
        let c = create_character(&store, &market, "bob", "Borus", Race::Human, Guild::Scout)
            .unwrap();
        earn_pennies(&store, &market, &c.id).unwrap();
        let after = earn_pennies(&store, &market, &c.id).unwrap();
        assert_eq!(after.money, Money::new(1, 8).unwrap());
    }

    #[test]
    fn blacksmith_permit_needs_blacksmith_guild() {
        let (_dir, store, market) = setup();
        let c = create_character(&store, &market, "bob", "Borus", Race::Human, Guild::Scout)
            .unwrap();
        assert!(matches!(
            grant_permit(&store, &c, "blacksmith"),
            Err(MarketError::PermissionDenied(_))
        ));

        let smith = CharacterRecord::new("smith", "Dradan", Race::Dwarf, Guild::Blacksmith, "Guildford");
        store.create_character(&smith, &[], false).unwrap();
        assert!(grant_permit(&store, &smith, "blacksmith").is_ok());
    }

    #[test]
    fn random_characters_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let branches = MarketConfig::default().branches;
        for _ in 0..50 {
            let c = random_character(&mut rng, "seed", &branches);
            assert!((10..60).contains(&c.money.crowns()));
            assert!(c.money.pennies() < 12);
            assert!(branches.contains(&c.branch));
            assert!(Guild::SELECTABLE.contains(&c.guild));
        }
    }

    #[test]
    fn generated_characters_bypass_single_active_rule() {
        let (_dir, store, market) = setup();
        let made = generate_characters(&store, &market, "seed", 10).unwrap();
        assert_eq!(made.len(), 10);
        assert_eq!(store.list_active_characters().unwrap().len(), 10);
        assert!(generate_characters(&store, &market, "seed", 0).is_err());
    }
}
