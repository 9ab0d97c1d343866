//! Console command processing.
//!
//! Every input line is either a path (`/marketplace`, `GO home`) or a verb with
//! arguments. [`CommandProcessor::process`] applies it to the [`Session`], re-runs the
//! navigation gate and returns the message followed by the freshly rendered page.
//!
//! Numbered arguments (`BUY 2`, `SELL 1 ...`, `DELIST 3`) refer to the rows of the
//! last marketplace or inventory page the session rendered.
use anyhow::Result;
use log::{debug, info, warn};

use super::gate::Route;
use super::session::Session;
use super::views;
use super::AppContext;
use crate::logutil::{escape_log, redact_command};
use crate::market::{
    self, parse_race, parse_selectable_guild, CategoryFilter, CharacterRecord, MarketError,
};
use crate::metrics;

const HELP_TEXT: &str = "Commands:
  /<page> or GO <page>      open a page (home, marketplace, local-marketplace, ...)
  LOGIN <user> <password>   REGISTER <user> <password>   LOGOUT
  CREATE <name> | <race> | <guild>
  BUY <n>   DELIST <n>   CATEGORY <all|weapons|armour|misc|consumable>
  SELL <n> <crowns> <pennies> <category> [qty]
  EARN   PERMIT <tag>   RETIRE   DIE
  HELP   QUIT";

#[derive(Debug, Default)]
pub struct CommandProcessor;

impl CommandProcessor {
    pub fn new() -> Self {
        CommandProcessor
    }

    /// Apply one console line and return the text to show.
    pub async fn process(&self, session: &mut Session, line: &str, ctx: &AppContext) -> Result<String> {
        let line = line.trim();
        debug!("command: {}", redact_command(line));
        session.last_activity = chrono::Utc::now();

        let message = if line.is_empty() {
            None
        } else if line.starts_with('/') {
            session.navigate(line, &ctx.config.app.basename, &ctx.market, &ctx.allow);
            None
        } else {
            let (verb, rest) = match line.split_once(char::is_whitespace) {
                Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim()),
                None => (line.to_ascii_uppercase(), ""),
            };
            match verb.as_str() {
                "HELP" | "?" => return Ok(HELP_TEXT.to_string()),
                "GO" => {
                    session.navigate(rest, &ctx.config.app.basename, &ctx.market, &ctx.allow);
                    None
                }
                "LOGIN" => Some(self.login(session, rest, ctx).await?),
                "REGISTER" => Some(self.register(session, rest, ctx).await?),
                "LOGOUT" => {
                    session.logout(&ctx.market, &ctx.allow);
                    Some("You have logged out.".to_string())
                }
                _ => Some(self.market_command(session, &verb, rest, ctx)),
            }
        };

        let page = match views::render(session, ctx).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Render of {} failed: {}", session.current_path, e);
                format!("Could not show this page: {}", e.user_message())
            }
        };
        Ok(match message {
            Some(msg) => format!("{}\n\n{}", msg, page),
            None => page,
        })
    }

    async fn login(&self, session: &mut Session, args: &str, ctx: &AppContext) -> Result<String> {
        let mut parts = args.split_whitespace();
        let (Some(username), Some(password)) = (parts.next(), parts.next()) else {
            return Ok("Usage: LOGIN <username> <password>".to_string());
        };
        if session.is_logged_in() {
            return Ok("You are already logged in. LOGOUT first.".to_string());
        }
        let (account, ok) = ctx.accounts.verify_password(username, password).await?;
        match account {
            Some(account) if ok => {
                ctx.accounts.record_login(&account.username).await?;
                metrics::inc_logins();
                session.login(&account.username, &ctx.market, &ctx.allow);
                let name = account.display_name().unwrap_or(account.username);
                Ok(format!("Welcome, {}.", name))
            }
            _ => {
                metrics::inc_failed_logins();
                warn!(target: "security", "Failed login for {}", escape_log(username));
                Ok("Invalid username or password.".to_string())
            }
        }
    }

    async fn register(&self, session: &mut Session, args: &str, ctx: &AppContext) -> Result<String> {
        let mut parts = args.split_whitespace();
        let (Some(username), Some(password)) = (parts.next(), parts.next()) else {
            return Ok("Usage: REGISTER <username> <password>".to_string());
        };
        if session.is_logged_in() {
            return Ok("You are already logged in. LOGOUT first.".to_string());
        }
        match ctx.accounts.register_account(username, password, None, None).await {
            Ok(account) => {
                info!(target: "security", "Registered account {}", escape_log(&account.username));
                ctx.accounts.record_login(&account.username).await?;
                metrics::inc_logins();
                session.login(&account.username, &ctx.market, &ctx.allow);
                Ok(format!("Account {} created. Welcome!", account.username))
            }
            Err(e) => Ok(format!("Registration failed: {}", e)),
        }
    }

    /// Verbs that act on market data. Failures become the returned message.
    fn market_command(&self, session: &mut Session, verb: &str, args: &str, ctx: &AppContext) -> String {
        let outcome = match verb {
            "CREATE" => self.create(session, args, ctx),
            "CATEGORY" => self.category(session, args),
            "BUY" => self.buy(session, args, ctx),
            "SELL" => self.sell(session, args, ctx),
            "DELIST" => self.delist(session, args, ctx),
            "EARN" => self.earn(session, ctx),
            "PERMIT" => self.permit(session, args, ctx),
            "RETIRE" => self.retire(session, ctx),
            "DIE" => self.die(session, ctx),
            _ => Ok(format!("Unknown command '{}'. Type HELP.", escape_log(verb))),
        };
        match outcome {
            Ok(msg) => msg,
            Err(e) => {
                debug!("{} failed: {}", verb, e);
                session.sync(&ctx.market, &ctx.allow);
                e.user_message()
            }
        }
    }

    fn create(&self, session: &mut Session, args: &str, ctx: &AppContext) -> Result<String, MarketError> {
        let Some(user) = session.username.clone() else {
            return Err(MarketError::Validation("Log in first.".to_string()));
        };
        let fields: Vec<&str> = args.split('|').map(str::trim).collect();
        let name = fields.first().copied().unwrap_or_default();
        let race = parse_race(fields.get(1).copied().unwrap_or_default())?;
        let guild = parse_selectable_guild(fields.get(2).copied().unwrap_or_default())?;
        let character = market::create_character(&ctx.market, &ctx.config.market, &user, name, race, guild)?;
        session.character_changed(Route::CharacterInventory, &ctx.market, &ctx.allow);
        Ok(format!(
            "{} the {} {} joins the {} branch.",
            character.name, character.race, character.guild, character.branch
        ))
    }

    fn category(&self, session: &mut Session, args: &str) -> Result<String, MarketError> {
        let filter = args.parse::<CategoryFilter>().map_err(MarketError::Validation)?;
        session.filter = filter;
        Ok(format!("Showing category: {}", filter))
    }

    fn buy(&self, session: &mut Session, args: &str, ctx: &AppContext) -> Result<String, MarketError> {
        let buyer = active_character(session)?;
        let listing_id = pick(&session.listing_ids, args, "listing")?;
        let purchase = market::buy(&ctx.market, &buyer, &listing_id)?;
        session.sync(&ctx.market, &ctx.allow);
        Ok(format!(
            "You bought {} for {}. Purse: {}",
            purchase.item_name, purchase.price, purchase.buyer_balance
        ))
    }

    fn sell(&self, session: &mut Session, args: &str, ctx: &AppContext) -> Result<String, MarketError> {
        let seller = active_character(session)?;
        let parts: Vec<&str> = args.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(MarketError::Validation(
                "Usage: SELL <n> <crowns> <pennies> <category> [qty]".to_string(),
            ));
        }
        let item_id = pick(&session.item_ids, parts[0], "item")?;
        let crowns = number(parts[1], "Crowns")?;
        let pennies = number(parts[2], "Pennies")?;
        let quantity = match parts.get(4) {
            Some(q) => u32::try_from(number(q, "Quantity")?).map_err(|_| {
                MarketError::Validation("Quantity is too large.".to_string())
            })?,
            None => 1,
        };
        let item = ctx
            .market
            .get_item(&seller.id, &item_id)?
            .ok_or_else(|| MarketError::NotFound("item".to_string()))?;
        let listing = market::sell(
            &ctx.market,
            &seller,
            &item,
            crowns,
            pennies,
            parts.get(3).copied(),
            quantity,
        )?;
        session.sync(&ctx.market, &ctx.allow);
        Ok(format!(
            "Listed {} x{} at {} each.",
            listing.name, listing.quantity, listing.price
        ))
    }

    fn delist(&self, session: &mut Session, args: &str, ctx: &AppContext) -> Result<String, MarketError> {
        let seller = active_character(session)?;
        let listing_id = pick(&session.listing_ids, args, "listing")?;
        let item = market::delist(&ctx.market, &seller, &listing_id)?;
        session.sync(&ctx.market, &ctx.allow);
        Ok(format!("{} returned to your inventory.", item.item_name))
    }

    fn earn(&self, session: &mut Session, ctx: &AppContext) -> Result<String, MarketError> {
        let character = active_character(session)?;
        let updated = market::earn_pennies(&ctx.market, &ctx.config.market, &character.id)?;
        session.sync(&ctx.market, &ctx.allow);
        Ok(format!(
            "You earned {}. Purse: {}",
            ctx.config.market.earn_amount(),
            updated.money
        ))
    }

    fn permit(&self, session: &mut Session, args: &str, ctx: &AppContext) -> Result<String, MarketError> {
        let character = active_character(session)?;
        let permit = market::grant_permit(&ctx.market, &character, args)?;
        session.sync(&ctx.market, &ctx.allow);
        Ok(format!("{} now holds a {} permit.", character.name, permit.permit))
    }

    fn retire(&self, session: &mut Session, ctx: &AppContext) -> Result<String, MarketError> {
        let character = active_character(session)?;
        let retired = market::retire(&ctx.market, &character.id)?;
        session.character_changed(Route::Home, &ctx.market, &ctx.allow);
        Ok(format!("{} has retired from adventuring.", retired.name))
    }

    fn die(&self, session: &mut Session, ctx: &AppContext) -> Result<String, MarketError> {
        let character = active_character(session)?;
        let dead = market::die(&ctx.market, &character.id)?;
        session.character_changed(Route::Home, &ctx.market, &ctx.allow);
        Ok(format!("{} has died. Rest in peace.", dead.name))
    }
}

fn active_character(session: &Session) -> Result<CharacterRecord, MarketError> {
    session
        .character
        .clone()
        .ok_or_else(|| MarketError::Validation("You need an active character.".to_string()))
}

/// Resolve a 1-based row number against the ids of the last page shown.
fn pick(ids: &[String], arg: &str, what: &str) -> Result<String, MarketError> {
    let arg = arg.trim();
    if ids.is_empty() {
        return Err(MarketError::Validation(format!(
            "No {} list is open. Visit the page first.",
            what
        )));
    }
    arg.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|idx| ids.get(idx))
        .cloned()
        .ok_or_else(|| {
            MarketError::Validation(format!("Pick a {} between 1 and {}.", what, ids.len()))
        })
}

fn number(arg: &str, field: &str) -> Result<u64, MarketError> {
    arg.parse::<u64>()
        .map_err(|_| MarketError::Validation(format!("{} must be a whole number.", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::gate::Route;
    use crate::config::{Argon2Config, Config, SecurityConfig};
    use crate::market::{Category, CharacterItem, ListingRecord, Money};
    use tempfile::TempDir;

    async fn context() -> (TempDir, AppContext) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_string_lossy().to_string();
        config.security = Some(SecurityConfig {
            argon2: Some(Argon2Config {
                memory_kib: Some(1024),
                time_cost: Some(1),
                parallelism: Some(1),
            }),
        });
        let ctx = AppContext::open(config).await.unwrap();
        (dir, ctx)
    }

    #[test]
    fn pick_resolves_one_based_rows() {
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(pick(&ids, "2", "listing").unwrap(), "b");
        assert!(pick(&ids, "0", "listing").is_err());
        assert!(pick(&ids, "3", "listing").is_err());
        assert!(pick(&[], "1", "item").is_err());
    }

    #[tokio::test]
    async fn register_create_and_browse() {
        let (_dir, ctx) = context().await;
        let cp = CommandProcessor::new();
        let mut s = Session::new();

        let out = cp.process(&mut s, "/marketplace", &ctx).await.unwrap();
        assert!(out.contains("Login"));

        let out = cp.process(&mut s, "REGISTER alice password123", &ctx).await.unwrap();
        assert!(out.contains("Create Character"), "{}", out);
        assert_eq!(s.route(), Route::CreateCharacter);

        let out = cp.process(&mut s, "CREATE Elara | elf | scout", &ctx).await.unwrap();
        assert!(out.contains("Elara"));
        assert_eq!(s.route(), Route::CharacterInventory);
        assert!(out.contains("Inventory"), "{}", out);

        cp.process(&mut s, "GO create-character", &ctx).await.unwrap();
        assert_eq!(s.route(), Route::Home);
    }

    #[tokio::test]
    async fn buy_and_sell_by_row_number() {
        let (_dir, ctx) = context().await;
        let cp = CommandProcessor::new();
        let mut s = Session::new();
        cp.process(&mut s, "REGISTER bob password123", &ctx).await.unwrap();
        cp.process(&mut s, "CREATE Gareth | human | mercenary", &ctx).await.unwrap();
        let id = s.character.as_ref().unwrap().id.clone();
        let mut rich = ctx.market.get_character(&id).unwrap().unwrap();
        rich.money = Money::new(10, 0).unwrap();
        ctx.market.put_character(&rich).unwrap();

        ctx.market
            .insert_listings(&[ListingRecord::new("Lantern", Money::new(1, 6).unwrap(), Category::Misc, 2)])
            .unwrap();
        cp.process(&mut s, "/marketplace", &ctx).await.unwrap();
        let out = cp.process(&mut s, "BUY 1", &ctx).await.unwrap();
        assert!(out.contains("You bought Lantern for 1c 6p"), "{}", out);
        assert_eq!(s.character.as_ref().unwrap().money, Money::new(8, 6).unwrap());

        ctx.market.put_item(&CharacterItem::new(&id, "Rope", 3, None)).unwrap();
        cp.process(&mut s, "/character-inventory", &ctx).await.unwrap();
        let rope_row = s
            .item_ids
            .iter()
            .position(|item| ctx.market.get_item(&id, item).unwrap().unwrap().item_name == "Rope")
            .unwrap()
            + 1;
        let out = cp
            .process(&mut s, &format!("SELL {} 0 12 misc 2", rope_row), &ctx)
            .await
            .unwrap();
        assert!(out.contains("Pennies must be less than 12"), "{}", out);
        let out = cp
            .process(&mut s, &format!("SELL {} 0 5 misc 2", rope_row), &ctx)
            .await
            .unwrap();
        assert!(out.contains("Listed Rope x2"), "{}", out);
    }

    #[tokio::test]
    async fn bad_password_is_rejected() {
        let (_dir, ctx) = context().await;
        let cp = CommandProcessor::new();
        let mut s = Session::new();
        cp.process(&mut s, "REGISTER carol password123", &ctx).await.unwrap();
        cp.process(&mut s, "LOGOUT", &ctx).await.unwrap();
        let out = cp.process(&mut s, "LOGIN carol wrongpass", &ctx).await.unwrap();
        assert!(out.contains("Invalid username or password"));
        assert!(!s.is_logged_in());
        let out = cp.process(&mut s, "LOGIN carol password123", &ctx).await.unwrap();
        assert!(out.contains("Welcome"));
        assert_eq!(s.route(), Route::CreateCharacter);
    }

    #[tokio::test]
    async fn dying_returns_to_character_creation() {
        let (_dir, ctx) = context().await;
        let cp = CommandProcessor::new();
        let mut s = Session::new();
        cp.process(&mut s, "REGISTER dave password123", &ctx).await.unwrap();
        cp.process(&mut s, "CREATE Brom | dwarf | mercenary", &ctx).await.unwrap();
        let out = cp.process(&mut s, "DIE", &ctx).await.unwrap();
        assert!(out.contains("Brom has died"));
        assert_eq!(s.route(), Route::CreateCharacter);
        assert_eq!(ctx.market.list_dead_characters().unwrap().len(), 1);
    }
}
