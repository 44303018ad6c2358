//! StateStore — redb-backed persistence for pingguard.
//!
//! Provides load/save/clear over per-target ping histories and the single
//! remediation cooldown record. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! Stored values that fail to decode, or decode into a history that breaks
//! its invariants, are never surfaced as errors: their raw bytes are moved
//! to the `backups` table and the caller gets an empty history or default
//! state instead.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, StorageBackend, Table, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use pingguard_core::{epoch_millis, TargetId};

use crate::error::{StateError, StateResult};
use crate::history::HealthHistory;
use crate::tables::*;
use crate::types::{ProbeOutcome, RemediationState};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RawTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type RawTableDef = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        Self::open_with_backend(redb::backends::InMemoryBackend::new())
    }

    /// Open a state store over a custom redb storage backend.
    pub fn open_with_backend(backend: impl StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("state store opened over custom backend");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HISTORIES).map_err(map_err!(Table))?;
        txn.open_table(REMEDIATION).map_err(map_err!(Table))?;
        txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Histories ──────────────────────────────────────────────────

    /// Load the history for `target`, or an empty one if none is stored.
    ///
    /// An unreadable stored history is backed up, removed, and replaced by
    /// an empty one.
    pub fn load_history(&self, target: TargetId) -> StateResult<HealthHistory> {
        let key = target.to_string();
        let raw = self.read_raw(HISTORIES, &key)?;
        let Some(raw) = raw else {
            debug!(target_ip = %target, "no stored history, starting empty");
            return Ok(HealthHistory::new(target));
        };

        match decode_history(&raw, target) {
            Some(history) => Ok(history),
            None => {
                let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
                {
                    let mut histories = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
                    let mut backups = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
                    quarantine(&mut histories, &mut backups, &key)?;
                }
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(HealthHistory::new(target))
            }
        }
    }

    /// Persist `history`, replacing whatever was stored for its target.
    pub fn save_history(&self, history: &HealthHistory) -> StateResult<()> {
        let key = history.target().to_string();
        let value = serde_json::to_vec(history).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, records = history.len(), "history stored");
        Ok(())
    }

    /// Append one probe result to the stored history of `target`.
    ///
    /// Load, insert, and save happen inside one write transaction, so
    /// concurrent recorders for the same target never lose an update.
    pub fn record_probe(
        &self,
        target: TargetId,
        outcome: ProbeOutcome,
        timestamp: u64,
    ) -> StateResult<HealthHistory> {
        let key = target.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let history = {
            let mut histories = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
            let mut backups = txn.open_table(BACKUPS).map_err(map_err!(Table))?;

            let raw = histories
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let mut history = match raw.as_deref().map(|raw| decode_history(raw, target)) {
                Some(Some(history)) => history,
                Some(None) => {
                    quarantine(&mut histories, &mut backups, &key)?;
                    HealthHistory::new(target)
                }
                None => HealthHistory::new(target),
            };

            history.record_probe(outcome, timestamp);
            let value = serde_json::to_vec(&history).map_err(map_err!(Serialize))?;
            histories
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            history
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(history)
    }

    /// Empty the history of `target`, keeping a timestamped backup of the
    /// stored value. Returns the backup key, if anything was stored.
    pub fn clear_history(&self, target: TargetId) -> StateResult<Option<String>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let backup_key = {
            let mut histories = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
            let mut backups = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
            clear_in(&mut histories, &mut backups, target)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        info!(target_ip = %target, backup = ?backup_key, "cleared pings");
        Ok(backup_key)
    }

    // ── Remediation ────────────────────────────────────────────────

    /// Load the remediation state. Missing or unreadable state is the
    /// default "never triggered" state.
    pub fn load_remediation_state(&self) -> StateResult<RemediationState> {
        let Some(raw) = self.read_raw(REMEDIATION, REMEDIATION_KEY)? else {
            return Ok(RemediationState::default());
        };

        match decode::<RemediationState>(&raw) {
            Some(state) => Ok(state),
            None => {
                let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
                {
                    let mut table = txn.open_table(REMEDIATION).map_err(map_err!(Table))?;
                    let mut backups = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
                    quarantine(&mut table, &mut backups, REMEDIATION_KEY)?;
                }
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(RemediationState::default())
            }
        }
    }

    pub fn save_remediation_state(&self, state: &RemediationState) -> StateResult<()> {
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REMEDIATION).map_err(map_err!(Table))?;
            table
                .insert(REMEDIATION_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(last_triggered_at = ?state.last_triggered_at, "remediation state stored");
        Ok(())
    }

    /// Stamp a remediation at `at` and empty the history of every target,
    /// backing up each stored value.
    ///
    /// Everything happens in one write transaction: either the stamp and
    /// all clears land, or nothing changes. Returns how many histories were
    /// cleared.
    pub fn commit_remediation(&self, at: u64, targets: &[TargetId]) -> StateResult<usize> {
        let stamp = serde_json::to_vec(&RemediationState {
            last_triggered_at: Some(at),
        })
        .map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut remediation = txn.open_table(REMEDIATION).map_err(map_err!(Table))?;
            remediation
                .insert(REMEDIATION_KEY, stamp.as_slice())
                .map_err(map_err!(Write))?;

            let mut histories = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
            let mut backups = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
            for &target in targets {
                clear_in(&mut histories, &mut backups, target)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(at, cleared = targets.len(), "remediation committed, pings cleared");
        Ok(targets.len())
    }

    // ── Backups ────────────────────────────────────────────────────

    /// Backup keys taken for `key` (a target IP or [`REMEDIATION_KEY`]), oldest first.
    pub fn list_backups(&self, key: &str) -> StateResult<Vec<String>> {
        let prefix = format!("{key}.");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (k, _) = entry.map_err(map_err!(Read))?;
            if k.value().starts_with(&prefix) {
                results.push(k.value().to_string());
            }
        }
        Ok(results)
    }

    /// Raw bytes of a backup.
    pub fn get_backup(&self, backup_key: &str) -> StateResult<Option<Vec<u8>>> {
        self.read_raw(BACKUPS, backup_key)
    }

    fn read_raw(
        &self,
        table: RawTableDef,
        key: &str,
    ) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        Ok(table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Option<T> {
    serde_json::from_slice(raw).ok()
}

/// Decode the history stored under `target`'s key.
///
/// A history naming another target, or holding two records with one id,
/// is rejected like undecodable bytes.
fn decode_history(raw: &[u8], target: TargetId) -> Option<HealthHistory> {
    let mut history: HealthHistory = decode(raw)?;
    if history.target() != target {
        return None;
    }
    {
        let mut ids = HashSet::with_capacity(history.len());
        if !history.records().all(|record| ids.insert(record.id())) {
            return None;
        }
    }
    history.truncate_to_capacity();
    Some(history)
}

/// Replace the history of `target` with an empty one, backing up any
/// stored value first.
fn clear_in(
    histories: &mut RawTable<'_>,
    backups: &mut RawTable<'_>,
    target: TargetId,
) -> StateResult<Option<String>> {
    let key = target.to_string();
    let empty = serde_json::to_vec(&HealthHistory::new(target)).map_err(map_err!(Serialize))?;
    let raw = histories
        .get(key.as_str())
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec());
    let backup_key = match raw {
        Some(raw) => Some(backup_raw(backups, &key, &raw)?),
        None => None,
    };
    histories
        .insert(key.as_str(), empty.as_slice())
        .map_err(map_err!(Write))?;
    Ok(backup_key)
}

/// Copy `raw` into the backups table under `{key}.{epoch_millis}`.
fn backup_raw(backups: &mut RawTable<'_>, key: &str, raw: &[u8]) -> StateResult<String> {
    let base = format!("{key}.{}", epoch_millis());
    let mut backup_key = base.clone();
    let mut n = 1;
    while backups
        .get(backup_key.as_str())
        .map_err(map_err!(Read))?
        .is_some()
    {
        backup_key = format!("{base}-{n}");
        n += 1;
    }
    backups
        .insert(backup_key.as_str(), raw)
        .map_err(map_err!(Write))?;
    Ok(backup_key)
}

/// Move an unreadable value out of `table` into the backups table.
fn quarantine(table: &mut RawTable<'_>, backups: &mut RawTable<'_>, key: &str) -> StateResult<()> {
    let raw = table
        .remove(key)
        .map_err(map_err!(Write))?
        .map(|guard| guard.value().to_vec());
    if let Some(raw) = raw {
        let backup_key = backup_raw(backups, key, &raw)?;
        error!(%key, %backup_key, "unreadable stored value, resetting; old value moved to backup");
    }
    Ok(())
}
