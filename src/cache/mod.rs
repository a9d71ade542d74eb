//! Cache store (C7): a persistent, keyed result cache backed by SQLite.
//!
//! Reads and synchronous writes go straight to the database under a single
//! mutex. When async writes are enabled, `save` instead buffers into a
//! pending map tagged with the current epoch; a background writer thread
//! periodically snapshots and drains that buffer. Deletes bump the epoch so
//! buffered entries from before the bump are invisible to both `load` and
//! the next drain, without needing to scan them.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use rusqlite::{params_from_iter, Connection, OpenFlags};

use crate::error::{EngineError, Result};

const MAX_BATCH_PARAMS: usize = 900;

/// Which evaluation stage produced a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// A low-fidelity pruning-stage result; may be dropped under pending pressure.
    Pilot,
    /// The authoritative, final-stage result.
    Full,
}

impl CacheKind {
    fn as_str(self) -> &'static str {
        match self {
            CacheKind::Pilot => "pilot",
            CacheKind::Full => "full",
        }
    }
}

/// One persisted (or pending) cache row.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// 64-char lowercase hex key, see [`crate::key::key`].
    pub key: String,
    /// Which stage produced this entry.
    pub kind: CacheKind,
    /// Opaque serialized payload (a serialized `SimulationResult`).
    pub payload: Vec<u8>,
    /// Unix seconds at write time.
    pub updated_unix_s: i64,
}

#[derive(Clone)]
struct PendingEntry {
    kind: CacheKind,
    payload: Vec<u8>,
    updated_unix_s: i64,
    epoch: u64,
}

struct Inner {
    conn: Mutex<Connection>,
    pending: Mutex<HashMap<String, PendingEntry>>,
    epoch: AtomicU64,
    dropped_pilot_entries: AtomicU64,
    accepting_writes: AtomicBool,
    shutting_down: AtomicBool,
    async_enabled: bool,
    max_pending_entries: usize,
    writer_flush_interval_ms: u64,
    signal: (Mutex<()>, Condvar),
}

/// A persistent, keyed result cache.
pub struct CacheStore {
    inner: Arc<Inner>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

fn now_unix_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl CacheStore {
    /// Opens (creating if needed) a cache database under `dir/cache.db`.
    pub fn open(
        dir: &Path,
        async_enabled: bool,
        max_pending_entries: usize,
        writer_flush_interval_ms: u64,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("cache.db");
        let uri = format!("file:{}?cache=shared", db_path.display());
        let conn = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                updated_utc INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_entries_kind_updated
                ON cache_entries(kind, updated_utc);",
        )?;

        let inner = Arc::new(Inner {
            conn: Mutex::new(conn),
            pending: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            dropped_pilot_entries: AtomicU64::new(0),
            accepting_writes: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            async_enabled,
            max_pending_entries,
            writer_flush_interval_ms,
            signal: (Mutex::new(()), Condvar::new()),
        });

        let writer = if async_enabled {
            Some(spawn_writer(Arc::clone(&inner)))
        } else {
            None
        };

        Ok(Self {
            inner,
            writer: Mutex::new(writer),
        })
    }

    /// Number of pilot entries dropped so far due to pending-buffer pressure.
    pub fn dropped_pilot_entries(&self) -> u64 {
        self.inner.dropped_pilot_entries.load(Ordering::Relaxed)
    }

    /// Loads payloads for the given keys, deduplicated, batched at
    /// [`MAX_BATCH_PARAMS`] keys per statement. Misses are simply absent from
    /// the returned map; a `CacheUnavailable` degrades to an empty result.
    pub fn load(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        let unique: Vec<String> = keys
            .iter()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut out = HashMap::new();

        if let Err(err) = self.load_persisted(&unique, &mut out) {
            log::warn!("cache load degraded to empty results: {err}");
            return HashMap::new();
        }

        if self.inner.async_enabled {
            let current_epoch = self.inner.epoch.load(Ordering::Acquire);
            let pending = self.inner.pending.lock();
            for k in &unique {
                if let Some(entry) = pending.get(k) {
                    if entry.epoch == current_epoch {
                        out.insert(k.clone(), entry.payload.clone());
                    }
                }
            }
        }

        out
    }

    fn load_persisted(&self, keys: &[String], out: &mut HashMap<String, Vec<u8>>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let conn = self.inner.conn.lock();
        for chunk in keys.chunks(MAX_BATCH_PARAMS) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("SELECT key, payload FROM cache_entries WHERE key IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let payload: Vec<u8> = row.get(1)?;
                out.insert(key, payload);
            }
        }
        Ok(())
    }

    /// Persists a batch of entries. Synchronously upserts when async writes
    /// are disabled; otherwise buffers into the pending map (dropping pilot
    /// entries once `max_pending_entries` is reached) and signals the writer.
    pub fn save(&self, entries: &[CacheEntry]) -> Result<()> {
        if !self.inner.accepting_writes.load(Ordering::Acquire) {
            return Ok(());
        }
        if entries.is_empty() {
            return Ok(());
        }

        if !self.inner.async_enabled {
            let mut conn = self.inner.conn.lock();
            let tx = conn.transaction()?;
            for entry in entries {
                tx.execute(
                    "INSERT INTO cache_entries (key, kind, payload, updated_utc) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, payload = excluded.payload, updated_utc = excluded.updated_utc",
                    rusqlite::params![entry.key, entry.kind.as_str(), entry.payload, entry.updated_unix_s],
                )?;
            }
            tx.commit()?;
            return Ok(());
        }

        let current_epoch = self.inner.epoch.load(Ordering::Acquire);
        {
            let mut pending = self.inner.pending.lock();
            for entry in entries {
                if pending.len() >= self.inner.max_pending_entries && entry.kind == CacheKind::Pilot {
                    self.inner.dropped_pilot_entries.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                pending.insert(
                    entry.key.clone(),
                    PendingEntry {
                        kind: entry.kind,
                        payload: entry.payload.clone(),
                        updated_unix_s: entry.updated_unix_s,
                        epoch: current_epoch,
                    },
                );
            }
        }
        self.signal_writer();
        Ok(())
    }

    fn signal_writer(&self) {
        let (_, cvar) = &self.inner.signal;
        cvar.notify_one();
    }

    /// Bumps the epoch, clears the pending buffer, then deletes `keys` from
    /// persisted storage.
    pub fn delete(&self, keys: &[String]) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.pending.lock().clear();
        if keys.is_empty() {
            return Ok(());
        }
        let conn = self.inner.conn.lock();
        for chunk in keys.chunks(MAX_BATCH_PARAMS) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("DELETE FROM cache_entries WHERE key IN ({placeholders})");
            conn.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        Ok(())
    }

    /// Bumps the epoch, clears the pending buffer, then deletes every
    /// persisted entry of `kind`.
    pub fn clear_kind(&self, kind: CacheKind) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.pending.lock().clear();
        let conn = self.inner.conn.lock();
        conn.execute("DELETE FROM cache_entries WHERE kind = ?1", [kind.as_str()])?;
        Ok(())
    }

    /// Bumps the epoch, clears the pending buffer, then deletes every
    /// persisted entry.
    pub fn clear_all(&self) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.pending.lock().clear();
        let conn = self.inner.conn.lock();
        conn.execute("DELETE FROM cache_entries", ())?;
        Ok(())
    }

    /// Polls pending-buffer emptiness, signaling the writer, until empty or
    /// `timeout` elapses.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        if !self.inner.async_enabled {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        while !self.inner.pending.lock().is_empty() {
            self.signal_writer();
            if Instant::now() >= deadline {
                return Err(EngineError::Transient(
                    "cache flush deadline exceeded with pending entries remaining".to_string(),
                ));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    /// Stops accepting writes, drains pending entries within `drain_timeout`,
    /// then cancels and joins the writer thread.
    pub fn shutdown(&self, drain_timeout: Duration) -> Result<()> {
        self.inner.accepting_writes.store(false, Ordering::Release);
        let flush_result = self.flush(drain_timeout);
        self.inner.shutting_down.store(true, Ordering::Release);
        self.signal_writer();
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
        flush_result
    }
}

fn spawn_writer(inner: Arc<Inner>) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        {
            let (lock, cvar) = &inner.signal;
            let mut guard = lock.lock();
            cvar.wait_for(&mut guard, Duration::from_millis(inner.writer_flush_interval_ms));
        }

        let snapshot = std::mem::take(&mut *inner.pending.lock());
        if !snapshot.is_empty() {
            let current_epoch = inner.epoch.load(Ordering::Acquire);
            let live: Vec<(String, PendingEntry)> = snapshot
                .into_iter()
                .filter(|(_, e)| e.epoch == current_epoch)
                .collect();
            if !live.is_empty() {
                if let Err(err) = upsert_batch(&inner, &live) {
                    log::warn!("cache writer drain failed, entries dropped: {err}");
                }
            }
        }

        if inner.shutting_down.load(Ordering::Acquire) && inner.pending.lock().is_empty() {
            break;
        }
    })
}

fn upsert_batch(inner: &Inner, entries: &[(String, PendingEntry)]) -> Result<()> {
    let mut conn = inner.conn.lock();
    let tx = conn.transaction()?;
    for (key, entry) in entries {
        tx.execute(
            "INSERT INTO cache_entries (key, kind, payload, updated_utc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, payload = excluded.payload, updated_utc = excluded.updated_utc",
            rusqlite::params![key, entry.kind.as_str(), entry.payload, entry.updated_unix_s],
        )?;
    }
    tx.commit()?;
    Ok(())
}

impl CacheEntry {
    /// Convenience constructor stamping `updated_unix_s` with the current time.
    pub fn new(key: String, kind: CacheKind, payload: Vec<u8>) -> Self {
        Self {
            key,
            kind,
            payload,
            updated_unix_s: now_unix_s(),
        }
    }
}
