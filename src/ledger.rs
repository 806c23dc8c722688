//! Reserve Ledger: lifetime counters and the protected reserve.
//!
//! The reserve is `total_claimed * reserve_fraction`, a function of cumulative
//! claims only. Counters never decrease and are written to the [`StatsStore`]
//! after every mutation. Store failures are logged; the in-memory values stay
//! authoritative for the running process.

use crate::error::{PersistError, Result};
use crate::types::Amount;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable record of the lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedStats {
    #[serde(alias = "totalSolClaimed")]
    pub total_claimed: Amount,
    #[serde(alias = "totalSolSwapped")]
    pub total_swapped: Amount,
    pub total_airdrops: u64,
    #[serde(alias = "totalTslaxDistributed")]
    pub total_distributed: Amount,
}

impl PersistedStats {
    fn sanitized(self) -> Self {
        let clean = |v: Amount| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        Self {
            total_claimed: clean(self.total_claimed),
            total_swapped: clean(self.total_swapped),
            total_airdrops: self.total_airdrops,
            total_distributed: clean(self.total_distributed),
        }
    }
}

pub trait StatsStore: Send + Sync {
    /// `Ok(None)` on first run.
    fn load(&self) -> Result<Option<PersistedStats>>;
    fn save(&self, stats: &PersistedStats) -> Result<()>;
}

/// Pretty-printed JSON file, replaced atomically through a sibling temp file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, err: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl StatsStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedStats>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_err(err).into()),
        };
        let stats = serde_json::from_str::<PersistedStats>(&raw)
            .map_err(|e| PersistError::Encoding(e.to_string()))?;
        Ok(Some(stats))
    }

    fn save(&self, stats: &PersistedStats) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let json = serde_json::to_vec_pretty(stats)
            .map_err(|e| PersistError::Encoding(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// Process-local store; clones share the same record.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Option<PersistedStats>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(stats: PersistedStats) -> Self {
        let store = Self::default();
        *lock_or_recover(&store.inner) = Some(stats);
        store
    }

    pub fn current(&self) -> Option<PersistedStats> {
        *lock_or_recover(&self.inner)
    }

    /// Makes every subsequent `save` fail, for exercising best-effort durability.
    pub fn set_fail_writes(&self, fail: bool) {
        *lock_or_recover(&self.fail_writes) = fail;
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl StatsStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedStats>> {
        Ok(self.current())
    }

    fn save(&self, stats: &PersistedStats) -> Result<()> {
        if *lock_or_recover(&self.fail_writes) {
            return Err(PersistError::Io {
                path: "memory".to_string(),
                reason: "writes disabled".to_string(),
            }
            .into());
        }
        *lock_or_recover(&self.inner) = Some(*stats);
        Ok(())
    }
}

pub struct ReserveLedger {
    stats: PersistedStats,
    reserve_fraction: f64,
    store: Box<dyn StatsStore>,
}

impl ReserveLedger {
    /// Loads counters verbatim from `store`; a missing or unreadable record starts at zero.
    pub fn open(store: Box<dyn StatsStore>, reserve_fraction: f64) -> Self {
        let stats = match store.load() {
            Ok(Some(stats)) => {
                tracing::info!(
                    "[LEDGER] Loaded persisted stats: claimed={:.4} swapped={:.4} airdrops={} distributed={:.2}",
                    stats.total_claimed,
                    stats.total_swapped,
                    stats.total_airdrops,
                    stats.total_distributed
                );
                stats.sanitized()
            }
            Ok(None) => {
                tracing::info!("[LEDGER] No persisted stats found; starting fresh.");
                PersistedStats::default()
            }
            Err(err) => {
                tracing::warn!("[LEDGER] Failed to load persisted stats ({err}); starting fresh.");
                PersistedStats::default()
            }
        };
        let reserve_fraction = if reserve_fraction.is_finite() {
            reserve_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            stats,
            reserve_fraction,
            store,
        }
    }

    fn persist(&self) {
        if let Err(err) = self.store.save(&self.stats) {
            tracing::warn!("[LEDGER] Failed to persist stats: {err}");
        }
    }

    fn non_negative(delta: Amount) -> Amount {
        if delta.is_finite() && delta > 0.0 {
            delta
        } else {
            0.0
        }
    }

    pub fn record_claim(&mut self, delta: Amount) {
        self.stats.total_claimed += Self::non_negative(delta);
        self.persist();
    }

    pub fn record_swap(&mut self, delta: Amount) {
        self.stats.total_swapped += Self::non_negative(delta);
        self.persist();
    }

    pub fn record_distribution(&mut self, amount: Amount, recipients: usize) {
        self.stats.total_airdrops = self.stats.total_airdrops.saturating_add(1);
        self.stats.total_distributed += Self::non_negative(amount);
        self.persist();
        tracing::debug!(
            "[LEDGER] Recorded distribution of {:.4} to {} recipients (airdrop #{})",
            amount,
            recipients,
            self.stats.total_airdrops
        );
    }

    pub fn reserve_amount(&self) -> Amount {
        self.stats.total_claimed * self.reserve_fraction
    }

    /// Never negative; zero whenever `current_balance` does not exceed the reserve.
    pub fn available_to_swap(&self, current_balance: Amount) -> Amount {
        if !current_balance.is_finite() {
            return 0.0;
        }
        (current_balance - self.reserve_amount()).max(0.0)
    }

    pub fn reserve_fraction(&self) -> f64 {
        self.reserve_fraction
    }

    pub fn stats(&self) -> PersistedStats {
        self.stats
    }
}
