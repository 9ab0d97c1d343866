//! Interactive console server.
//!
//! Reads one command per line, hands it to the [`CommandProcessor`] and writes the
//! reply. A housekeeping tick keeps the configured NPC stock buyable while the
//! console is idle.

use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::commands::CommandProcessor;
use super::session::Session;
use super::AppContext;
use crate::config::Config;
use crate::market::shop::format_stock_summary;
use crate::metrics;

const REPLENISH_INTERVAL: Duration = Duration::from_secs(300);
const RECENT_ACTIVITY: usize = 5;

pub struct AppServer {
    ctx: AppContext,
    processor: CommandProcessor,
    session: Session,
}

impl AppServer {
    /// Open the stores and stock the NPC shop.
    pub async fn new(config: Config) -> Result<Self> {
        let ctx = AppContext::open(config).await?;
        let changed = ctx.replenish_stock()?;
        if changed > 0 {
            info!("Restocked {} NPC listings", changed);
        }
        let mut session = Session::new();
        session.sync(&ctx.market, &ctx.allow);
        Ok(AppServer {
            ctx,
            processor: CommandProcessor::new(),
            session,
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Run on stdin/stdout until QUIT, end of input or Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        tokio::select! {
            res = self.run_io(stdin, stdout) => res,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                Ok(())
            }
        }
    }

    /// The console loop over arbitrary streams.
    pub async fn run_io<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("{} console started", self.ctx.config.app.name);
        let mut lines = reader.lines();
        let mut housekeeping = tokio::time::interval(REPLENISH_INTERVAL);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; stock was already checked in new().
        housekeeping.tick().await;

        let banner = self.processor.process(&mut self.session, "", &self.ctx).await?;
        write_reply(&mut writer, &banner).await?;

        loop {
            tokio::select! {
                _ = housekeeping.tick() => {
                    match self.ctx.replenish_stock() {
                        Ok(0) => debug!("NPC stock check: nothing to do"),
                        Ok(n) => info!("Restocked {} NPC listings", n),
                        Err(e) => warn!("NPC stock check failed: {}", e),
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("End of input");
                        break;
                    };
                    if line.trim().eq_ignore_ascii_case("quit") {
                        write_reply(&mut writer, "Farewell.").await?;
                        break;
                    }
                    let reply = match self.processor.process(&mut self.session, &line, &self.ctx).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!("Command failed: {}", e);
                            format!("Something went wrong: {}", e)
                        }
                    };
                    write_reply(&mut writer, &reply).await?;
                }
            }
        }
        info!("Console closed");
        Ok(())
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n> ").await?;
    writer.flush().await?;
    Ok(())
}

/// Lines for `guildmarket status`.
pub async fn status_lines(ctx: &AppContext) -> Result<Vec<String>> {
    let accounts = ctx.accounts.list_accounts().await?;
    let (active, dead, listings) = ctx.market.counts()?;
    let mut lines = vec![
        format!("{} status", ctx.config.app.name),
        format!("Accounts: {}", accounts.len()),
        format!("Characters: {} active, {} dead", active, dead),
        format!("Listings: {}", listings),
    ];
    lines.extend(metrics::format_snapshot(&metrics::snapshot()));
    lines.extend(format_stock_summary(&ctx.market.list_listings()?));
    let recent = ctx.market.recent_logs(RECENT_ACTIVITY)?;
    if !recent.is_empty() {
        lines.push("Recent activity:".to_string());
        lines.extend(recent.into_iter().map(|entry| format!("  {}", entry)));
    }
    Ok(lines)
}
