//! # Guild Market - characters and a crowns-and-pennies marketplace
//!
//! Guild Market is a small role-playing economy served over an interactive console.
//! Players register an account, create one active character (race, guild, branch),
//! and trade items on a shared marketplace priced in crowns and pennies
//! (12 pennies to the crown).
//!
//! ## Features
//!
//! - **Navigation gate**: every page request passes through a three-state machine
//!   (anonymous, no character, active) that redirects to login, character creation
//!   or home.
//! - **Money**: a normalised crowns/pennies value object; purchases settle on the
//!   flattened penny total.
//! - **Marketplace**: buy one unit, sell part of a stack, delist, with global and
//!   per-branch views and category filters. Permit-gated listings.
//! - **Characters**: creation, retirement and death archives, guild permits, an
//!   allowance for testing, and community pages (branch members, the recently dead).
//! - **NPC shop**: configured stock is replenished at startup and periodically.
//! - **Storage**: sled for market records, one JSON file per account with Argon2id
//!   password hashes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use guildmarket::config::Config;
//! use guildmarket::app::AppServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut server = AppServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`app`] - gate, sessions, pages, console commands and the server loop
//! - [`market`] - market records, the sled store and the trading flows
//! - [`storage`] - account persistence
//! - [`config`] - configuration management and validation
//! - [`validation`] - input validation and sanitization utilities
//! - [`metrics`] - in-process counters
//!
//! ```text
//! ┌─────────────────┐
//! │  Console / App  │ ← gate, sessions, commands
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │     Market      │ ← money, flows, store procedures
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  sled + JSON    │ ← persistence
//! └─────────────────┘
//! ```

pub mod app;
pub mod config;
pub mod logutil;
pub mod market;
pub mod metrics;
pub mod storage;
pub mod validation;
