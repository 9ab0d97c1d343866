/// Character inventory helpers
use super::types::{CharacterItem, CharacterRecord};

/// Total units across all stacks
pub fn total_units(items: &[CharacterItem]) -> u32 {
    items.iter().map(|i| i.quantity).sum()
}

/// Format the inventory page body.
pub fn format_inventory(character: &CharacterRecord, items: &[CharacterItem]) -> Vec<String> {
    let mut lines = vec![
        format!("=== {}'s Inventory ===", character.name),
        format!("Purse: {}", character.money.long_form()),
    ];

    if items.is_empty() {
        lines.push("You are not carrying anything.".to_string());
        return lines;
    }

    for (idx, item) in items.iter().enumerate() {
        let crafted = item
            .crafter_user
            .as_deref()
            .map(|c| format!(" (crafted by {})", c))
            .unwrap_or_default();
        lines.push(format!(
            "{}. {} x{}{}",
            idx + 1,
            item.item_name,
            item.quantity,
            crafted
        ));
    }
    lines.push(format!("{} items in {} stacks", total_units(items), items.len()));
    lines
}
