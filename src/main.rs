//! Binary entrypoint for the Guild Market CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the data directories
//! - `start` - run the interactive console on stdin/stdout
//! - `status` - print account, character and listing counts
//! - `register <username>` - create an account (password prompted without echo)
//! - `seed-characters`, `generate-items`, `add-shop-item`, `replenish` - admin seeding
//! - `graveyard` - list every dead character with its owner
//!
//! See the library crate docs for module-level details: `guildmarket::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;

use guildmarket::app::server::status_lines;
use guildmarket::app::views::dead_characters_page;
use guildmarket::app::{AppContext, AppServer};
use guildmarket::config::Config;
use guildmarket::market::{self, parse_money, Category};

#[derive(Parser)]
#[command(name = "guildmarket")]
#[command(about = "Character and marketplace service for a guild role-playing game")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the data directories
    Init,
    /// Start the interactive console
    Start,
    /// Show record counts and market metrics
    Status,
    /// Register an account
    Register {
        username: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Create random characters for a user
    SeedCharacters {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Create random listings sold by a user
    GenerateItems {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Add a system (NPC) listing
    AddShopItem {
        #[arg(long)]
        name: String,
        /// Price such as "4c 6p", "2c" or "28p"
        #[arg(long)]
        price: String,
        #[arg(long)]
        category: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
    },
    /// Make sure configured NPC stock is buyable
    Replenish,
    /// List every dead character with its owner
    Graveyard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        info!("Initializing new Guild Market configuration");
        Config::create_default(&cli.config).await?;
        let cfg = Config::default();
        tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
        // Opening the stores creates users/ and the market database.
        AppContext::open(cfg).await?;
        println!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);

    match cli.command {
        Commands::Init => {}
        Commands::Start => {
            info!("Starting Guild Market v{}", env!("CARGO_PKG_VERSION"));
            let mut server = AppServer::new(config).await?;
            server.run().await?;
        }
        Commands::Status => {
            let ctx = AppContext::open(config).await?;
            for line in status_lines(&ctx).await? {
                println!("{}", line);
            }
        }
        Commands::Register {
            username,
            first_name,
            last_name,
        } => {
            let ctx = AppContext::open(config).await?;
            let pass1 = rpassword::prompt_password("Password: ")?;
            let pass2 = rpassword::prompt_password("Confirm password: ")?;
            if pass1 != pass2 {
                println!("Error: passwords do not match.");
                return Ok(());
            }
            let account = ctx
                .accounts
                .register_account(&username, &pass1, first_name.as_deref(), last_name.as_deref())
                .await?;
            info!(target: "security", "Registered account {} from the CLI", account.username);
            println!("Account '{}' created.", account.username);
        }
        Commands::SeedCharacters { user, count } => {
            let ctx = AppContext::open(config).await?;
            require_account(&ctx, &user).await?;
            let created = market::generate_characters(&ctx.market, &ctx.config.market, &user, count)?;
            for c in &created {
                println!("{} ({} {}, {}) {}", c.name, c.race, c.guild, c.branch, c.money);
            }
            println!("Seeded {} characters for {}.", created.len(), user);
        }
        Commands::GenerateItems { user, count } => {
            let ctx = AppContext::open(config).await?;
            require_account(&ctx, &user).await?;
            let listings = market::generate_items(&ctx.market, &user, count)?;
            for l in &listings {
                println!("{} [{}] {}", l.name, l.category, l.price);
            }
            println!("Generated {} listings.", listings.len());
        }
        Commands::AddShopItem {
            name,
            price,
            category,
            quantity,
        } => {
            let ctx = AppContext::open(config).await?;
            let price = parse_money(&price)?;
            let category = category.parse::<Category>().map_err(|e| anyhow!(e))?;
            let listing = market::add_shop_item(&ctx.market, &name, price, category, quantity)?;
            println!("Added {} x{} at {}.", listing.name, listing.quantity, listing.price);
        }
        Commands::Replenish => {
            let ctx = AppContext::open(config).await?;
            let changed = ctx.replenish_stock()?;
            println!("{} stock entries updated.", changed);
        }
        Commands::Graveyard => {
            let ctx = AppContext::open(config).await?;
            for line in dead_characters_page(&ctx).await? {
                println!("{}", line);
            }
        }
    }

    Ok(())
}

async fn require_account(ctx: &AppContext, user: &str) -> Result<()> {
    if ctx.accounts.get_account(user).await?.is_none() {
        return Err(anyhow!("No account named '{}'", user));
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.as_ref().and_then(|cfg| {
        cfg.logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        })
    });
    let security_path = config.as_ref().and_then(|c| c.logging.security_file.clone());

    match file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // The console UI owns stdout; log lines are mirrored to stderr only on a terminal.
            let is_tty = atty::is(atty::Stream::Stderr);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }
                if is_tty && verbosity > 0 {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}
