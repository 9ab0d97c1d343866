//! Text rendering of each page. Pages that show numbered rows record the ids behind
//! the numbers in the session.

use super::gate::Route;
use super::session::Session;
use super::AppContext;
use crate::market::{
    branch_members, capitalize, dead_characters_with_owners, format_inventory, global_listings,
    latest_listings, local_listings, recently_dead, Category, CharacterRecord, Guild,
    ListingRecord, ListingView, MarketError, Money, Race, BLACKSMITH_PERMIT,
};

fn header(ctx: &AppContext, title: &str) -> String {
    format!("=== {} :: {} ===", ctx.config.app.name, title)
}

fn character_line(c: &CharacterRecord) -> String {
    format!(
        "{} - {} {} ({}), {} branch",
        c.name,
        capitalize(c.race.as_str()),
        capitalize(c.guild.as_str()),
        c.guild_rank,
        c.branch
    )
}

fn listing_line(idx: usize, view: &ListingView, purse: Option<&Money>) -> String {
    let l = &view.listing;
    let stock = if l.quantity == 0 {
        "sold out".to_string()
    } else {
        format!("x{}", l.quantity)
    };
    let mut line = format!(
        "{}. {} - {} ({}) [{}] seller: {}",
        idx + 1,
        l.name,
        l.price,
        stock,
        l.category,
        view.seller_name
    );
    if l.crafter_user.is_some() {
        line.push_str(&format!(", crafter: {}", view.crafter_name));
    }
    if let Some(permit) = &l.required_permit {
        line.push_str(&format!(" (requires {} permit)", permit));
    }
    if purse.is_some_and(|p| !p.can_afford(&l.price)) {
        line.push_str(" - too dear");
    }
    line
}

fn latest_line(l: &ListingRecord) -> String {
    format!("- {} for {}", l.name, l.price.long_form())
}

/// Render the session's current page.
pub async fn render(session: &mut Session, ctx: &AppContext) -> Result<String, MarketError> {
    let mut lines: Vec<String> = session.take_notices();
    if !lines.is_empty() {
        lines.push(String::new());
    }
    let route = session.route();
    let body = match (&route, session.character.clone()) {
        (Route::Login, _) => login_page(ctx),
        (Route::CreateCharacter, _) => create_character_page(ctx),
        (_, None) => vec![header(ctx, "Nowhere")],
        (Route::Root | Route::Home, Some(c)) => home_page(ctx, &c)?,
        (Route::CharacterInventory, Some(c)) => inventory_page(session, ctx, &c)?,
        (Route::Marketplace, Some(_)) => marketplace_page(session, ctx, false)?,
        (Route::LocalMarketplace, Some(_)) => marketplace_page(session, ctx, true)?,
        (Route::BranchMembers, Some(c)) => branch_members_page(ctx, &c)?,
        (Route::RecentlyDead, Some(_)) => recently_dead_page(ctx)?,
        (Route::Blacksmith, Some(c)) => blacksmith_page(session, ctx, &c),
        (Route::DeadCharacters, Some(_)) => dead_characters_page(ctx).await?,
        (Route::Other(path), Some(_)) => vec![
            header(ctx, "Not Found"),
            format!("There is no page at {}.", path),
        ],
    };
    lines.extend(body);
    Ok(lines.join("\n"))
}

fn login_page(ctx: &AppContext) -> Vec<String> {
    vec![
        header(ctx, "Login"),
        "Welcome, traveller. Identify yourself to enter the market.".to_string(),
        "  LOGIN <username> <password>".to_string(),
        "  REGISTER <username> <password>".to_string(),
    ]
}

fn create_character_page(ctx: &AppContext) -> Vec<String> {
    let races: Vec<String> = Race::ALL.iter().map(|r| capitalize(r.as_str())).collect();
    let guilds: Vec<String> = Guild::SELECTABLE
        .iter()
        .map(|g| capitalize(g.as_str()))
        .collect();
    vec![
        header(ctx, "Create Character"),
        "You have no active character. Create one to continue.".to_string(),
        format!("Races: {}", races.join(", ")),
        format!("Guilds: {}", guilds.join(", ")),
        format!("New characters join the {} branch.", ctx.config.market.default_branch),
        "  CREATE <name> | <race> | <guild>".to_string(),
    ]
}

fn home_page(ctx: &AppContext, c: &CharacterRecord) -> Result<Vec<String>, MarketError> {
    let mut lines = vec![
        header(ctx, "Home"),
        format!("Welcome back, {}.", c.name),
        character_line(c),
        format!("Purse: {}", c.money.long_form()),
        String::new(),
        "Latest in the marketplace:".to_string(),
    ];
    let latest = latest_listings(&ctx.market, ctx.config.market.latest_items_limit)?;
    if latest.is_empty() {
        lines.push("- nothing for sale yet".to_string());
    } else {
        lines.extend(latest.iter().map(latest_line));
    }
    lines.push(String::new());
    lines.push(
        "Pages: /character-inventory /marketplace /local-marketplace /branch-members /the-recently-dead /blacksmith"
            .to_string(),
    );
    Ok(lines)
}

fn inventory_page(
    session: &mut Session,
    ctx: &AppContext,
    c: &CharacterRecord,
) -> Result<Vec<String>, MarketError> {
    let items = ctx.market.list_items(&c.id)?;
    session.item_ids = items.iter().map(|i| i.id.clone()).collect();
    let mut lines = vec![header(ctx, "Inventory")];
    lines.extend(format_inventory(c, &items));
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    lines.push(String::new());
    lines.push(format!(
        "  SELL <n> <crowns> <pennies> <{}> [qty]",
        categories.join("|")
    ));
    lines.push(format!(
        "  EARN (+{} pennies)   PERMIT <tag>   RETIRE   DIE",
        ctx.config.market.earn_pennies
    ));
    Ok(lines)
}

fn marketplace_page(
    session: &mut Session,
    ctx: &AppContext,
    local: bool,
) -> Result<Vec<String>, MarketError> {
    let (title, views) = match (&session.character, local) {
        (Some(c), true) => (
            format!("{} Marketplace", c.branch),
            local_listings(&ctx.market, c, session.filter)?,
        ),
        _ => (
            "Marketplace".to_string(),
            global_listings(&ctx.market, session.filter)?,
        ),
    };
    session.listing_ids = views.iter().map(|v| v.listing.id.clone()).collect();

    let mut lines = vec![header(ctx, &title)];
    if let Some(c) = &session.character {
        lines.push(format!("Purse: {}", c.money));
    }
    lines.push(format!("Category: {}", session.filter));
    if views.is_empty() {
        lines.push("No items for sale.".to_string());
    } else {
        let purse = session.character.as_ref().map(|c| &c.money);
        lines.extend(views.iter().enumerate().map(|(i, v)| listing_line(i, v, purse)));
    }
    lines.push(String::new());
    lines.push("  BUY <n>   DELIST <n>   CATEGORY <all|weapons|armour|misc|consumable>".to_string());
    Ok(lines)
}

fn branch_members_page(ctx: &AppContext, c: &CharacterRecord) -> Result<Vec<String>, MarketError> {
    let members = branch_members(&ctx.market, c)?;
    let mut lines = vec![header(ctx, &format!("{} Branch Members", c.branch))];
    if members.is_empty() {
        lines.push("No other adventurers in your branch.".to_string());
    }
    lines.extend(members.iter().map(|m| format!("- {}", character_line(m))));
    Ok(lines)
}

fn recently_dead_page(ctx: &AppContext) -> Result<Vec<String>, MarketError> {
    let dead = recently_dead(&ctx.market, ctx.config.market.recently_dead_limit)?;
    let mut lines = vec![header(ctx, "The Recently Dead")];
    if dead.is_empty() {
        lines.push("No one has died recently. Yet.".to_string());
    }
    for d in &dead {
        let when = d
            .died_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        lines.push(format!(
            "- {} the {} {}, {} branch, died {}",
            d.name,
            d.race,
            d.guild,
            d.branch,
            when
        ));
    }
    Ok(lines)
}

fn blacksmith_page(session: &Session, ctx: &AppContext, c: &CharacterRecord) -> Vec<String> {
    if !session.has_permit(BLACKSMITH_PERMIT) {
        return vec![
            header(ctx, "Permit Required"),
            "You need a blacksmith permit to use the forge.".to_string(),
        ];
    }
    vec![
        header(ctx, "Blacksmith"),
        format!("The forge is hot, {}. Crafting opens soon.", c.name),
    ]
}

pub async fn dead_characters_page(ctx: &AppContext) -> Result<Vec<String>, MarketError> {
    let names = ctx
        .accounts
        .display_names()
        .await
        .map_err(|e| MarketError::Internal(e.to_string()))?;
    let roll = dead_characters_with_owners(&ctx.market, |user| names.get(user).cloned())?;
    let mut lines = vec![header(ctx, "Deceased Characters")];
    if roll.is_empty() {
        lines.push("The graveyard is empty.".to_string());
    }
    lines.extend(roll.iter().map(|d| {
        format!(
            "- {} ({} {}), played by {}",
            d.character.name, d.character.race, d.character.guild, d.owner_name
        )
    }));
    Ok(lines)
}
