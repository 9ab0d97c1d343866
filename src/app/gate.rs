//! Navigation gate: where a user may be given their authentication and character state.

use std::collections::HashSet;
use std::fmt;

use crate::config::DEFAULT_ALLOWED_PATHS;

/// Known pages. Unknown paths are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Root,
    Login,
    CreateCharacter,
    Home,
    CharacterInventory,
    Marketplace,
    BranchMembers,
    RecentlyDead,
    LocalMarketplace,
    Blacksmith,
    DeadCharacters,
    Other(String),
}

impl Route {
    pub fn from_path(path: &str) -> Route {
        match path {
            "/" => Route::Root,
            "/login" => Route::Login,
            "/create-character" => Route::CreateCharacter,
            "/home" => Route::Home,
            "/character-inventory" => Route::CharacterInventory,
            "/marketplace" => Route::Marketplace,
            "/branch-members" => Route::BranchMembers,
            "/the-recently-dead" => Route::RecentlyDead,
            "/local-marketplace" => Route::LocalMarketplace,
            "/blacksmith" => Route::Blacksmith,
            "/dead-characters" => Route::DeadCharacters,
            other => Route::Other(other.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Route::Root => "/",
            Route::Login => "/login",
            Route::CreateCharacter => "/create-character",
            Route::Home => "/home",
            Route::CharacterInventory => "/character-inventory",
            Route::Marketplace => "/marketplace",
            Route::BranchMembers => "/branch-members",
            Route::RecentlyDead => "/the-recently-dead",
            Route::LocalMarketplace => "/local-marketplace",
            Route::Blacksmith => "/blacksmith",
            Route::DeadCharacters => "/dead-characters",
            Route::Other(path) => path,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Derived from (authenticated, has active character).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Anonymous,
    NoCharacter,
    Active,
}

impl AccessState {
    pub fn derive(authenticated: bool, has_character: bool) -> Self {
        match (authenticated, has_character) {
            (false, _) => AccessState::Anonymous,
            (true, false) => AccessState::NoCharacter,
            (true, true) => AccessState::Active,
        }
    }
}

/// Normalised paths an active user may visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    paths: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| normalize_path(p.as_ref(), ""))
                .collect(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }
}

impl Default for AllowList {
    fn default() -> Self {
        AllowList::new(DEFAULT_ALLOWED_PATHS)
    }
}

/// Canonical form of a path typed at the console or configured: leading slash,
/// no `basename` prefix, lowercase and no trailing slash.
///
/// The basename match is case-sensitive so "/Marketplace" (the prefix) and
/// "/marketplace" (the page) stay distinct.
pub fn normalize_path(raw: &str, basename: &str) -> String {
    let mut path = raw.trim().to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    let base = basename.trim_end_matches('/');
    if !base.is_empty() {
        if path == base || path == format!("{}/", base) {
            path = "/".to_string();
        } else if let Some(rest) = path.strip_prefix(&format!("{}/", base)) {
            path = format!("/{}", rest);
        }
    }
    let mut path = path.to_ascii_lowercase();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// Where the user must go instead of `path`, if anywhere.
pub fn redirect_for(state: AccessState, path: &str, allow: &AllowList) -> Option<Route> {
    match state {
        AccessState::Anonymous if path != Route::Login.path() => Some(Route::Login),
        AccessState::NoCharacter if path != Route::CreateCharacter.path() => {
            Some(Route::CreateCharacter)
        }
        AccessState::Active if !allow.contains(path) => Some(Route::Home),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PATHS: [&str; 6] = ["/", "/home", "/login", "/create-character", "/blacksmith", "/admin"];

    #[test]
    fn anonymous_always_lands_on_login() {
        let allow = AllowList::default();
        for path in SAMPLE_PATHS {
            let r = redirect_for(AccessState::Anonymous, path, &allow);
            if path == "/login" {
                assert_eq!(r, None);
            } else {
                assert_eq!(r, Some(Route::Login), "{}", path);
            }
        }
    }

    #[test]
    fn no_character_lands_on_create() {
        let allow = AllowList::default();
        for path in SAMPLE_PATHS {
            let r = redirect_for(AccessState::NoCharacter, path, &allow);
            if path == "/create-character" {
                assert_eq!(r, None);
            } else {
                assert_eq!(r, Some(Route::CreateCharacter), "{}", path);
            }
        }
    }

    #[test]
    fn active_outside_allow_list_goes_home() {
        let allow = AllowList::default();
        assert_eq!(redirect_for(AccessState::Active, "/marketplace", &allow), None);
        assert_eq!(redirect_for(AccessState::Active, "/", &allow), None);
        assert_eq!(redirect_for(AccessState::Active, "/login", &allow), Some(Route::Home));
        assert_eq!(
            redirect_for(AccessState::Active, "/create-character", &allow),
            Some(Route::Home)
        );
        assert_eq!(redirect_for(AccessState::Active, "/admin", &allow), Some(Route::Home));
    }

    #[test]
    fn configured_allow_list_is_normalised() {
        let allow = AllowList::new(["/home/", "Marketplace"]);
        assert!(allow.contains("/home"));
        assert!(allow.contains("/marketplace"));
        assert_eq!(redirect_for(AccessState::Active, "/blacksmith", &allow), Some(Route::Home));
    }

    #[test]
    fn paths_are_normalised() {
        assert_eq!(normalize_path("/Marketplace/home/", "/Marketplace"), "/home");
        assert_eq!(normalize_path("/Marketplace", "/Marketplace"), "/");
        assert_eq!(normalize_path("/marketplace", "/Marketplace"), "/marketplace");
        assert_eq!(
            normalize_path("/Marketplace/marketplace", "/Marketplace"),
            "/marketplace"
        );
        assert_eq!(normalize_path("local-marketplace", "/Marketplace"), "/local-marketplace");
        assert_eq!(normalize_path("/", ""), "/");
        assert_eq!(normalize_path("/HOME//", ""), "/home");
    }

    #[test]
    fn route_round_trip() {
        for path in crate::config::DEFAULT_ALLOWED_PATHS {
            assert_eq!(Route::from_path(path).path(), path);
        }
        assert_eq!(Route::from_path("/nowhere"), Route::Other("/nowhere".to_string()));
    }
}
