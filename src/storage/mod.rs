//! # Storage Module - Account Persistence
//!
//! Accounts are stored one JSON file per user, written atomically under an
//! exclusive file lock. Passwords are hashed with Argon2id.
//!
//! ```text
//! data/
//! ├── users/          ← one <username>.json per account
//! └── market/         ← sled database for characters and listings
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use guildmarket::storage::AccountStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let accounts = AccountStore::new("./data").await?;
//!     accounts.register_account("alice", "correct horse", Some("Alice"), None).await?;
//!     let (account, ok) = accounts.verify_password("alice", "correct horse").await?;
//!     assert!(ok && account.is_some());
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::warn;
use password_hash::{PasswordHasher, PasswordVerifier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::Argon2Config;
use crate::validation::{safe_filename, secure_json_parse, validate_file_size, validate_user_name};

const MAX_ACCOUNT_FILE_BYTES: u64 = 100_000;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Account {
    /// "First Last" from the profile, if either part is set.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// File-backed account store
pub struct AccountStore {
    data_dir: PathBuf,
    argon2: Argon2<'static>,
}

/// Build Argon2 params from config; None keeps the library defaults.
pub fn argon2_params(cfg: Option<&Argon2Config>) -> Result<Option<Params>> {
    let Some(cfg) = cfg else {
        return Ok(None);
    };
    if cfg.memory_kib.is_none() && cfg.time_cost.is_none() && cfg.parallelism.is_none() {
        return Ok(None);
    }
    let params = Params::new(
        cfg.memory_kib.unwrap_or(Params::DEFAULT_M_COST),
        cfg.time_cost.unwrap_or(Params::DEFAULT_T_COST),
        cfg.parallelism.unwrap_or(Params::DEFAULT_P_COST),
        None,
    )
    .map_err(|e| anyhow!("Invalid argon2 parameters: {e}"))?;
    Ok(Some(params))
}

impl AccountStore {
    /// Open the store rooted at `data_dir`, creating `users/` if needed.
    pub async fn new(data_dir: &str) -> Result<Self> {
        Self::new_with_params(data_dir, None).await
    }

    /// Open the store with explicit Argon2 params
    pub async fn new_with_params(data_dir: &str, params: Option<Params>) -> Result<Self> {
        let users_dir = Path::new(data_dir).join("users");
        fs::create_dir_all(&users_dir)
            .await
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", data_dir, e))?;
        let argon2 = match params {
            Some(p) => Argon2::new(Algorithm::Argon2id, Version::V0x13, p),
            None => Argon2::default(),
        };
        Ok(AccountStore {
            data_dir: PathBuf::from(data_dir),
            argon2,
        })
    }

    fn account_path(&self, username: &str) -> PathBuf {
        self.data_dir
            .join("users")
            .join(format!("{}.json", safe_filename(&username.to_lowercase())))
    }

    /// Write content to a file atomically while holding an exclusive lock.
    async fn write_file_locked(path: &Path, content: &str) -> Result<()> {
        use std::fs::{File, OpenOptions};
        use std::io::Write;

        // fs2 locks are synchronous
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        lock_file.lock_exclusive()?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let base = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("account.json");
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut tmp) => {
                    tmp.write_all(content.as_bytes())?;
                    tmp.flush()?;
                    let _ = tmp.sync_all();
                    break candidate;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                }
                Err(e) => {
                    return Err(anyhow!("Failed to create temp file for atomic write: {}", e))
                }
            }
        };

        std::fs::rename(&tmp_path, path)?;
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
        drop(lock_file);
        Ok(())
    }

    async fn read_account(path: &Path) -> Result<Account> {
        let metadata = fs::metadata(path).await?;
        validate_file_size(metadata.len(), MAX_ACCOUNT_FILE_BYTES)
            .map_err(|e| anyhow!("Account file too large: {}", e))?;
        let content = fs::read_to_string(path).await?;
        secure_json_parse(&content, MAX_ACCOUNT_FILE_BYTES as usize)
            .map_err(|e| anyhow!("Failed to parse account file: {}", e))
    }

    async fn save(&self, account: &Account) -> Result<()> {
        let json = serde_json::to_string_pretty(account)?;
        Self::write_file_locked(&self.account_path(&account.username), &json).await
    }

    /// Register a new account; fails if the username is taken.
    pub async fn register_account(
        &self,
        username: &str,
        password: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<Account> {
        let username = validate_user_name(username).map_err(|e| anyhow!("Invalid username: {}", e))?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(anyhow!(
                "Password too short (minimum {} characters)",
                MIN_PASSWORD_LEN
            ));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(anyhow!("Password too long"));
        }
        if self.get_account(&username).await?.is_some() {
            return Err(anyhow!("Username '{}' is already taken", username));
        }

        let salt = password_hash::SaltString::generate(&mut rand::thread_rng());
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("Password hash failure: {e}"))?;
        let account = Account {
            username: username.to_lowercase(),
            first_name: first_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            last_name: last_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            password_hash: hash.to_string(),
            created_at: Utc::now(),
            last_login: None,
        };
        self.save(&account).await?;
        Ok(account)
    }

    /// Verify a password; returns (account, matched)
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<(Option<Account>, bool)> {
        let Some(account) = self.get_account(username).await? else {
            return Ok((None, false));
        };
        let parsed = password_hash::PasswordHash::new(&account.password_hash)
            .map_err(|e| anyhow!("Corrupt password hash: {e}"))?;
        let ok = self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();
        Ok((Some(account), ok))
    }

    /// Record a successful login and return the updated account.
    pub async fn record_login(&self, username: &str) -> Result<Account> {
        let mut account = self
            .get_account(username)
            .await?
            .ok_or_else(|| anyhow!("User not found"))?;
        account.last_login = Some(Utc::now());
        self.save(&account).await?;
        Ok(account)
    }

    pub async fn get_account(&self, username: &str) -> Result<Option<Account>> {
        let path = self.account_path(username);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_account(&path).await?))
    }

    /// All accounts, sorted by username. Unreadable files are skipped with a warning.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let users_dir = self.data_dir.join("users");
        let mut accounts = Vec::new();
        if users_dir.exists() {
            let mut entries = fs::read_dir(&users_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_file()
                    && path.extension().is_some_and(|ext| ext == "json")
                {
                    match Self::read_account(&path).await {
                        Ok(account) => accounts.push(account),
                        Err(e) => warn!("Failed to read account file {:?}: {}", path, e),
                    }
                }
            }
        }
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    /// username -> profile display name, for accounts that set one.
    pub async fn display_names(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .list_accounts()
            .await?
            .into_iter()
            .filter_map(|a| a.display_name().map(|name| (a.username, name)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn register_and_verify() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().to_str().unwrap()).await.unwrap();
        store
            .register_account("Alice", "password123", Some("Alice"), Some("Smith"))
            .await
            .unwrap();

        let (account, ok) = store.verify_password("alice", "password123").await.unwrap();
        assert!(ok);
        assert_eq!(account.unwrap().display_name().as_deref(), Some("Alice Smith"));

        let (_, bad) = store.verify_password("alice", "wrongpass").await.unwrap();
        assert!(!bad);
        let (missing, _) = store.verify_password("nobody", "password123").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_and_weak_registrations_fail() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().to_str().unwrap()).await.unwrap();
        store.register_account("bob", "password123", None, None).await.unwrap();
        assert!(store.register_account("BOB", "password456", None, None).await.is_err());
        assert!(store.register_account("carol", "short", None, None).await.is_err());
        assert!(store.register_account("../x", "password123", None, None).await.is_err());
    }

    #[tokio::test]
    async fn login_updates_last_login_and_listing() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().to_str().unwrap()).await.unwrap();
        store.register_account("dave", "password123", Some("Dave"), None).await.unwrap();
        store.register_account("erin", "password123", None, None).await.unwrap();
        assert!(store.get_account("dave").await.unwrap().unwrap().last_login.is_none());
        let updated = store.record_login("dave").await.unwrap();
        assert!(updated.last_login.is_some());

        let names: Vec<String> = store
            .list_accounts()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.username)
            .collect();
        assert_eq!(names, vec!["dave", "erin"]);
        let display = store.display_names().await.unwrap();
        assert_eq!(display.get("dave").map(String::as_str), Some("Dave"));
        assert!(!display.contains_key("erin"));
    }

    #[test]
    fn argon2_params_from_config() {
        assert!(argon2_params(None).unwrap().is_none());
        let cfg = Argon2Config {
            memory_kib: Some(8 * 1024),
            time_cost: Some(1),
            parallelism: Some(1),
        };
        let params = argon2_params(Some(&cfg)).unwrap().unwrap();
        assert_eq!(params.m_cost(), 8 * 1024);
    }
}
