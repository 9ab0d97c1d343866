//! Community pages: branch members and the dead.

use crate::market::errors::MarketError;
use crate::market::storage::MarketStore;
use crate::market::types::CharacterRecord;

pub const UNKNOWN_OWNER: &str = "Unknown User";

/// A dead character with its owner's display name.
#[derive(Debug, Clone, PartialEq)]
pub struct DeceasedEntry {
    pub character: CharacterRecord,
    pub owner_name: String,
}

/// Active characters sharing the viewer's branch, excluding the viewer's own user,
/// sorted by name.
pub fn branch_members(
    store: &MarketStore,
    viewer: &CharacterRecord,
) -> Result<Vec<CharacterRecord>, MarketError> {
    let mut members: Vec<CharacterRecord> = store
        .list_active_characters()?
        .into_iter()
        .filter(|c| c.branch == viewer.branch && c.user != viewer.user)
        .collect();
    members.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(members)
}

/// The newest `limit` deaths.
pub fn recently_dead(store: &MarketStore, limit: usize) -> Result<Vec<CharacterRecord>, MarketError> {
    let mut dead = store.list_dead_characters()?;
    dead.truncate(limit);
    Ok(dead)
}

/// All dead characters, newest first, with owner names resolved by `owner_name`
/// (usually the account profile lookup).
pub fn dead_characters_with_owners<F>(
    store: &MarketStore,
    owner_name: F,
) -> Result<Vec<DeceasedEntry>, MarketError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(store
        .list_dead_characters()?
        .into_iter()
        .map(|character| {
            let owner_name = owner_name(&character.user).unwrap_or_else(|| UNKNOWN_OWNER.to_string());
            DeceasedEntry {
                character,
                owner_name,
            }
        })
        .collect())
}
