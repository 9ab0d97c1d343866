/// Character creation, permits, retirement, death and the community pages.
mod common;

use guildmarket::config::MarketConfig;
use guildmarket::market::{
    self, branch_members, dead_characters_with_owners, recently_dead, CharacterRecord, Guild,
    MarketError, Money, Race,
};

#[test]
fn one_active_character_per_user() {
    let (_dir, store) = common::market_store();
    let market = MarketConfig::default();
    let first = market::create_character(&store, &market, "alice", "Elara", Race::Elf, Guild::Scout).unwrap();
    assert_eq!(first.branch, "Portsmouth");
    assert_eq!(first.guild_rank, "recruit");
    assert_eq!(first.money, Money::new(0, 0).unwrap());
    assert!(store.has_permit(&first.id, "weapon").unwrap());

    let err = market::create_character(&store, &market, "alice", "Twin", Race::Human, Guild::Mercenary)
        .unwrap_err();
    assert!(matches!(err, MarketError::ActiveCharacterExists(_)));

    market::retire(&store, &first.id).unwrap();
    assert_eq!(store.list_retired_characters().unwrap().len(), 1);
    let second = market::create_character(&store, &market, "alice", "Twin", Race::Human, Guild::Mercenary).unwrap();
    assert_eq!(store.find_active_character("alice").unwrap().unwrap().id, second.id);
}

#[test]
fn names_and_guilds_are_validated() {
    let (_dir, store) = common::market_store();
    let market = MarketConfig::default();
    let err = market::create_character(&store, &market, "bob", "   ", Race::Dwarf, Guild::Mercenary)
        .unwrap_err();
    assert_eq!(err.user_message(), "Please enter a character name.");
    assert!(market::parse_selectable_guild("blacksmith").is_err());
    assert!(market::parse_race("").is_err());
    assert_eq!(market::parse_race("Half-Elf").unwrap(), Race::HalfElf);
}

#[test]
fn earning_carries_pennies_into_crowns() {
    let (_dir, store) = common::market_store();
    let market = MarketConfig::default();
    let c = common::character(&store, "carl", "Cade", 0, 5);
    let updated = market::earn_pennies(&store, &market, &c.id).unwrap();
    assert_eq!(updated.money, Money::new(1, 3).unwrap());
}

#[test]
fn blacksmith_permit_is_guild_only() {
    let (_dir, store) = common::market_store();
    let merc = common::character(&store, "dan", "Dax", 0, 0);
    assert!(matches!(
        market::grant_permit(&store, &merc, "blacksmith"),
        Err(MarketError::PermissionDenied(_))
    ));
    market::grant_permit(&store, &merc, "Tavern").unwrap();
    assert!(store.has_permit(&merc.id, "tavern").unwrap());
    assert!(market::grant_permit(&store, &merc, "tavern").is_err());

    let smith = CharacterRecord::new("eve", "Ember", Race::Dwarf, Guild::Blacksmith, "Portsmouth");
    store.create_character(&smith, &[], false).unwrap();
    market::grant_permit(&store, &smith, "blacksmith").unwrap();
}

#[test]
fn community_pages_follow_branch_and_death() {
    let (_dir, store) = common::market_store();
    let viewer = common::character(&store, "alice", "Elara", 0, 0);
    common::character(&store, "bob", "Zed", 0, 0);
    common::character(&store, "carl", "Abe", 0, 0);
    let far = CharacterRecord::new("dan", "Far", Race::Human, Guild::Scout, "Guildford");
    store.create_character(&far, &[], false).unwrap();

    let names: Vec<String> = branch_members(&store, &viewer)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Abe".to_string(), "Zed".to_string()]);

    market::die(&store, &far.id).unwrap();
    assert!(store.find_active_character("dan").unwrap().is_none());
    assert_eq!(recently_dead(&store, 20).unwrap()[0].name, "Far");

    let roll = dead_characters_with_owners(&store, |user| {
        (user == "dan").then(|| "Dan Dunmore".to_string())
    })
    .unwrap();
    assert_eq!(roll.len(), 1);
    assert_eq!(roll[0].owner_name, "Dan Dunmore");
    assert!(market::die(&store, &far.id).is_err());
}

#[test]
fn seeding_bypasses_the_single_character_rule() {
    let (_dir, store) = common::market_store();
    let market = MarketConfig::default();
    let created = market::generate_characters(&store, &market, "seed", 4).unwrap();
    assert_eq!(created.len(), 4);
    assert_eq!(
        store
            .list_active_characters()
            .unwrap()
            .iter()
            .filter(|c| c.user == "seed")
            .count(),
        4
    );
    for c in &created {
        assert!(c.money.crowns() >= 10 && c.money.crowns() < 60);
        assert!(market.branches.contains(&c.branch));
    }
    assert!(market::generate_characters(&store, &market, "seed", 0).is_err());
}
