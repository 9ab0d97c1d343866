use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::gate::{normalize_path, redirect_for, AccessState, AllowList, Route};
use crate::logutil::escape_log;
use crate::market::{CategoryFilter, CharacterRecord, MarketStore};
use crate::metrics;

/// # Console Session
///
/// One interactive user of the console. The session owns the navigation state:
/// who is logged in, their active character (with permits), the current page and
/// the category filter of the marketplace pages.
///
/// ## Gate
///
/// Every change (login, logout, character creation or loss, navigation) ends in
/// [`Session::sync`], which reloads the active character and applies the redirect
/// rules of [`redirect_for`]. The last change wins: a redirect replaces the requested
/// page.
///
/// ## Index commands
///
/// Pages that show numbered rows remember the ids behind the numbers so `BUY 2` or
/// `DELIST 1` refer to what the user just saw.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: Option<String>,
    pub character: Option<CharacterRecord>,
    pub permits: Vec<String>,
    pub current_path: String,
    pub filter: CategoryFilter,
    /// Listing ids behind the numbers on the last marketplace page shown
    pub listing_ids: Vec<String>,
    /// Item stack ids behind the numbers on the last inventory page shown
    pub item_ids: Vec<String>,
    /// Messages to show above the next page (lookup failures, flow results)
    pub notices: Vec<String>,
    pub login_time: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session {
            username: None,
            character: None,
            permits: Vec::new(),
            current_path: Route::Login.path().to_string(),
            filter: CategoryFilter::All,
            listing_ids: Vec::new(),
            item_ids: Vec::new(),
            notices: Vec::new(),
            login_time: None,
            last_activity: Utc::now(),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.username.is_some()
    }

    pub fn access_state(&self) -> AccessState {
        AccessState::derive(self.is_logged_in(), self.character.is_some())
    }

    pub fn route(&self) -> Route {
        Route::from_path(&self.current_path)
    }

    pub fn has_permit(&self, permit: &str) -> bool {
        self.permits.iter().any(|p| p.eq_ignore_ascii_case(permit))
    }

    /// Reload the active character and its permits. A failed lookup is reported
    /// as a notice and leaves the session without a character.
    pub fn refresh_character(&mut self, store: &MarketStore) {
        let Some(user) = self.username.clone() else {
            self.character = None;
            self.permits.clear();
            return;
        };
        let loaded = store.find_active_character(&user).and_then(|c| match c {
            Some(c) => store
                .list_permits(&c.id)
                .map(|permits| Some((c, permits.into_iter().map(|p| p.permit).collect::<Vec<String>>()))),
            None => Ok(None),
        });
        match loaded {
            Ok(Some((character, permits))) => {
                self.character = Some(character);
                self.permits = permits;
            }
            Ok(None) => {
                self.character = None;
                self.permits.clear();
            }
            Err(e) => {
                warn!("Character lookup failed for {}: {}", escape_log(&user), e);
                self.notices
                    .push(format!("Could not load your character: {}", e.user_message()));
                self.character = None;
                self.permits.clear();
            }
        }
    }

    /// Re-run the gate for the current page; returns the redirect taken, if any.
    pub fn sync(&mut self, store: &MarketStore, allow: &AllowList) -> Option<Route> {
        self.refresh_character(store);
        self.last_activity = Utc::now();
        let redirect = redirect_for(self.access_state(), &self.current_path, allow);
        if let Some(target) = &redirect {
            debug!(
                "gate: {:?} at {} -> {}",
                self.access_state(),
                escape_log(&self.current_path),
                target
            );
            metrics::record_redirect(target.path());
            self.current_path = target.path().to_string();
        }
        redirect
    }

    /// Request a page; the gate decides where the user actually ends up.
    pub fn navigate(
        &mut self,
        raw_path: &str,
        basename: &str,
        store: &MarketStore,
        allow: &AllowList,
    ) -> Route {
        self.current_path = normalize_path(raw_path, basename);
        self.sync(store, allow);
        self.route()
    }

    pub fn login(&mut self, username: &str, store: &MarketStore, allow: &AllowList) -> Route {
        self.username = Some(username.to_ascii_lowercase());
        self.login_time = Some(Utc::now());
        info!("{} logged in", escape_log(username));
        self.current_path = Route::Home.path().to_string();
        self.sync(store, allow);
        self.route()
    }

    pub fn logout(&mut self, store: &MarketStore, allow: &AllowList) -> Route {
        if let Some(user) = self.username.take() {
            info!("{} logged out", escape_log(&user));
        }
        self.login_time = None;
        self.listing_ids.clear();
        self.item_ids.clear();
        self.filter = CategoryFilter::All;
        self.sync(store, allow);
        self.route()
    }

    /// Called after the active character was created, retired or killed; the gate
    /// may still redirect away from `landing`.
    pub fn character_changed(&mut self, landing: Route, store: &MarketStore, allow: &AllowList) -> Route {
        self.listing_ids.clear();
        self.item_ids.clear();
        self.current_path = landing.path().to_string();
        self.sync(store, allow);
        self.route()
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Guild, MarketStoreBuilder, Race, CHARACTER_SCHEMA_VERSION};
    use tempfile::TempDir;

    fn store() -> (TempDir, MarketStore) {
        let dir = TempDir::new().unwrap();
        let store = MarketStoreBuilder::new(dir.path()).open().unwrap();
        (dir, store)
    }

    #[test]
    fn anonymous_navigation_is_sent_to_login() {
        let (_dir, store) = store();
        let allow = AllowList::default();
        let mut s = Session::new();
        assert_eq!(s.navigate("/marketplace", "/Marketplace", &store, &allow), Route::Login);
    }

    #[test]
    fn login_without_character_goes_to_create() {
        let (_dir, store) = store();
        let allow = AllowList::default();
        let mut s = Session::new();
        assert_eq!(s.login("alice", &store, &allow), Route::CreateCharacter);
        assert_eq!(s.navigate("/home", "", &store, &allow), Route::CreateCharacter);
    }

    #[test]
    fn character_unlocks_allow_list_and_blocks_create_page() {
        let (_dir, store) = store();
        let allow = AllowList::default();
        let mut s = Session::new();
        s.login("alice", &store, &allow);

        let c = CharacterRecord::new("alice", "Elara", Race::Elf, Guild::Scout, "Portsmouth");
        store.create_character(&c, &["weapon".to_string()], false).unwrap();
        assert_eq!(
            s.character_changed(Route::CharacterInventory, &store, &allow),
            Route::CharacterInventory
        );
        assert_eq!(s.navigate("/Marketplace/marketplace/", "/Marketplace", &store, &allow), Route::Marketplace);
        assert!(s.has_permit("WEAPON"));
        assert_eq!(s.navigate("/create-character", "", &store, &allow), Route::Home);
        assert_eq!(s.navigate("/dead-characters", "", &store, &allow), Route::Home);

        store.kill_character_and_move(&c.id).unwrap();
        assert_eq!(s.character_changed(Route::Home, &store, &allow), Route::CreateCharacter);
        assert!(s.character.is_none());

        assert_eq!(s.logout(&store, &allow), Route::Login);
        assert!(s.username.is_none());
    }

    #[test]
    fn unreadable_character_is_reported_and_treated_as_missing() {
        let (_dir, store) = store();
        let allow = AllowList::default();
        let mut broken = CharacterRecord::new("alice", "Elara", Race::Elf, Guild::Scout, "Portsmouth");
        broken.schema_version = CHARACTER_SCHEMA_VERSION + 1;
        store.put_character(&broken).unwrap();

        let mut s = Session::new();
        assert_eq!(s.login("alice", &store, &allow), Route::CreateCharacter);
        assert!(s.character.is_none());
        assert!(s.permits.is_empty());
        assert_eq!(
            s.take_notices(),
            vec![format!(
                "Could not load your character: schema mismatch for character: expected {}, got {}",
                CHARACTER_SCHEMA_VERSION,
                CHARACTER_SCHEMA_VERSION + 1
            )]
        );
    }

    #[test]
    fn another_users_unreadable_character_does_not_block_login() {
        let (_dir, store) = store();
        let allow = AllowList::default();
        let mut broken = CharacterRecord::new("zed", "Zed", Race::Human, Guild::Mercenary, "Portsmouth");
        broken.schema_version = CHARACTER_SCHEMA_VERSION + 1;
        store.put_character(&broken).unwrap();
        let c = CharacterRecord::new("alice", "Elara", Race::Elf, Guild::Scout, "Portsmouth");
        store.create_character(&c, &[], false).unwrap();

        let mut s = Session::new();
        assert_eq!(s.login("alice", &store, &allow), Route::Home);
        assert_eq!(s.character.as_ref().map(|c| c.id.as_str()), Some(c.id.as_str()));
        assert!(s.take_notices().is_empty());
    }
}
