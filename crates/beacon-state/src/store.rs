//! RegistryStore — redb-backed service registry.
//!
//! Every mutating operation runs inside a single redb write transaction.
//! redb admits one writer at a time, so register, heartbeat, sweep and
//! evict are serialized against each other and each sees the committed
//! result of its predecessor. Reads (`list`, `get`) run on MVCC snapshots
//! and never block writers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{StateError, StateResult};
use crate::tables::SERVICES;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type ServiceTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Thread-safe registry store backed by redb.
///
/// Cheap to clone; all clones share the same database and clock.
#[derive(Clone)]
pub struct RegistryStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl RegistryStore {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "registry store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory registry store opened");
        Ok(store)
    }

    /// Replace the time source used for heartbeat and staleness timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let store = Self {
            db: Arc::new(db),
            clock: Arc::new(SystemClock),
        };
        // Opening a table in a write transaction creates it if absent.
        let txn = store.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(store)
    }

    // ── Client operations ──────────────────────────────────────────

    /// Register a new service. Fails with `Conflict` if the name is taken.
    pub fn register(&self, name: &str, host: &str, port: u16) -> StateResult<ServiceRecord> {
        validate_registration(name, host, port)?;
        let record = self.write(|table, now| {
            if load(&*table, name)?.is_some() {
                return Err(StateError::Conflict(name.to_string()));
            }
            let record = ServiceRecord::new(name, host, port, now);
            save(table, &record)?;
            Ok(record)
        })?;
        info!(%name, %host, port, "service registered");
        Ok(record)
    }

    /// Snapshot of every live service, healthy or not.
    pub fn list(&self) -> StateResult<Vec<ServiceEndpoint>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?.endpoint());
        }
        Ok(results)
    }

    /// Full record for one service, including health and version.
    pub fn get(&self, name: &str) -> StateResult<Option<ServiceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        load(&table, name)
    }

    /// Accept a heartbeat: refresh `last_heartbeat`, force healthy, bump version.
    ///
    /// A heartbeat for an unknown name is reported as `NotFound`.
    pub fn heartbeat(&self, name: &str) -> StateResult<ServiceRecord> {
        self.touch(name, None)
    }

    /// Like [`heartbeat`](Self::heartbeat), but only if the stored version
    /// still equals `expected`.
    pub fn heartbeat_if_version(&self, name: &str, expected: u64) -> StateResult<ServiceRecord> {
        self.touch(name, Some(expected))
    }

    fn touch(&self, name: &str, expected: Option<u64>) -> StateResult<ServiceRecord> {
        let result = self.write(|table, now| {
            let mut record =
                load(&*table, name)?.ok_or_else(|| StateError::NotFound(name.to_string()))?;
            if let Some(expected) = expected {
                if record.version != expected {
                    return Err(StateError::VersionMismatch {
                        name: name.to_string(),
                        expected,
                        actual: record.version,
                    });
                }
            }
            let revived = !record.is_healthy;
            record.touch(now);
            save(table, &record)?;
            Ok((record, revived))
        });

        match result {
            Ok((record, revived)) => {
                if revived {
                    info!(%name, version = record.version, "unhealthy service revived by heartbeat");
                } else {
                    debug!(%name, version = record.version, "heartbeat accepted");
                }
                Ok(record)
            }
            Err(StateError::NotFound(name)) => {
                warn!(%name, "heartbeat for unregistered service");
                Err(StateError::NotFound(name))
            }
            Err(e) => Err(e),
        }
    }

    // ── Monitor operations ─────────────────────────────────────────

    /// Flag every healthy record whose last heartbeat is older than
    /// `threshold`. The predicate is evaluated against one instant.
    pub fn mark_unhealthy_if_stale(&self, threshold: Duration) -> StateResult<SweepOutcome> {
        let outcome = self.write(|table, now| {
            let mut stale = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record = decode(value.value())?;
                if record.is_healthy && record.is_stale(now, threshold) {
                    stale.push(record);
                }
            }

            let mut flagged = Vec::with_capacity(stale.len());
            for mut record in stale {
                record.flag_unhealthy(now);
                save(table, &record)?;
                flagged.push(record.name);
            }
            Ok(SweepOutcome {
                swept_at: now,
                flagged,
            })
        })?;
        debug!(
            swept_at = outcome.swept_at,
            count = outcome.flagged.len(),
            "staleness sweep complete"
        );
        Ok(outcome)
    }

    /// Delete every unhealthy record flagged by a sweep before `flagged_before`.
    ///
    /// Returns the names that were removed.
    pub fn evict_unhealthy(&self, flagged_before: u64) -> StateResult<Vec<ServiceName>> {
        let evicted = self.write(|table, _now| {
            let mut doomed = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record = decode(value.value())?;
                if record.flagged_before(flagged_before) {
                    doomed.push(record.name);
                }
            }
            for name in &doomed {
                table.remove(name.as_str()).map_err(map_err!(Write))?;
            }
            Ok(doomed)
        })?;
        debug!(count = evicted.len(), "eviction pass complete");
        Ok(evicted)
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Run `op` against the services table in one write transaction.
    ///
    /// The transaction commits only if `op` succeeds. `now` is read after
    /// the writer lock is held, so timestamps follow commit order.
    fn write<T>(
        &self,
        op: impl FnOnce(&mut ServiceTable<'_>, u64) -> StateResult<T>,
    ) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let now = self.clock.now_ms();
        let result = {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            op(&mut table, now)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "failed to abort registry transaction");
                }
                Err(e)
            }
        }
    }
}

fn validate_registration(name: &str, host: &str, port: u16) -> StateResult<()> {
    if name.trim().is_empty() {
        return Err(StateError::Invalid("name must not be empty".to_string()));
    }
    if host.trim().is_empty() {
        return Err(StateError::Invalid("host must not be empty".to_string()));
    }
    if port == 0 {
        return Err(StateError::Invalid("port must be in 1..=65535".to_string()));
    }
    Ok(())
}

fn load<T>(table: &T, name: &str) -> StateResult<Option<ServiceRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(name).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn save(table: &mut ServiceTable<'_>, record: &ServiceRecord) -> StateResult<()> {
    let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
    table
        .insert(record.name.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn decode(bytes: &[u8]) -> StateResult<ServiceRecord> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}
