//! In-process market counters, printed by `guildmarket status` and the console.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static PURCHASES: AtomicU64 = AtomicU64::new(0);
static SALES: AtomicU64 = AtomicU64::new(0);
static DELISTS: AtomicU64 = AtomicU64::new(0);
static LOGINS: AtomicU64 = AtomicU64::new(0);
static FAILED_LOGINS: AtomicU64 = AtomicU64::new(0);

static REDIRECTS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();

pub fn inc_purchases() {
    PURCHASES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_sales() {
    SALES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_delists() {
    DELISTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_logins() {
    LOGINS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_failed_logins() {
    FAILED_LOGINS.fetch_add(1, Ordering::Relaxed);
}

fn redirect_lock() -> &'static Mutex<HashMap<String, u64>> {
    REDIRECTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Count a gate redirect, keyed by the target path.
pub fn record_redirect(target: &str) -> u64 {
    let mut guard = redirect_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let counter = guard.entry(target.to_string()).or_default();
    *counter = counter.saturating_add(1);
    *counter
}

pub fn redirects_snapshot() -> HashMap<String, u64> {
    redirect_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub purchases: u64,
    pub sales: u64,
    pub delists: u64,
    pub logins: u64,
    pub failed_logins: u64,
    pub redirects: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        purchases: PURCHASES.load(Ordering::Relaxed),
        sales: SALES.load(Ordering::Relaxed),
        delists: DELISTS.load(Ordering::Relaxed),
        logins: LOGINS.load(Ordering::Relaxed),
        failed_logins: FAILED_LOGINS.load(Ordering::Relaxed),
        redirects: redirects_snapshot().values().sum(),
    }
}

/// Lines for the status output.
pub fn format_snapshot(snap: &Snapshot) -> Vec<String> {
    vec![
        format!(
            "Market: {} purchases, {} sales, {} delists",
            snap.purchases, snap.sales, snap.delists
        ),
        format!(
            "Sessions: {} logins, {} failed logins, {} redirects",
            snap.logins, snap.failed_logins, snap.redirects
        ),
    ]
}
