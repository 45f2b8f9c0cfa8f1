mod bookings;
mod conflict;
mod error;
mod experts;
mod lifecycle;
mod notifications;
mod slots;
mod store;

pub use bookings::NewBooking;
pub use error::{ConflictScope, EngineError, ErrorKind};
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::cache::{CacheBackend, MemoryCache, SlotCache};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::lock::{LocalLocks, LockManager, ScopedLock};
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        done: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        snapshot: Vec<Event>,
        done: oneshot::Sender<io::Result<()>>,
    },
    AppendedSinceRewrite {
        done: oneshot::Sender<u64>,
    },
}

type Waiter = oneshot::Sender<io::Result<()>>;

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// committed together with a single fsync.
struct WalWriter {
    wal: Wal,
    rx: mpsc::Receiver<WalCommand>,
}

impl WalWriter {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            let mut waiters: Vec<Waiter> = Vec::new();
            let mut deferred = None;
            let mut failure: Option<io::Error> = None;
            let mut next = Some(cmd);

            while let Some(cmd) = next.take() {
                match cmd {
                    WalCommand::Append { event, done } => {
                        if failure.is_none()
                            && let Err(e) = self.wal.append(&event)
                        {
                            failure = Some(e);
                        }
                        waiters.push(done);
                        next = self.rx.try_recv().ok();
                    }
                    other => deferred = Some(other),
                }
            }

            if !waiters.is_empty() {
                self.commit(waiters, failure);
            }
            if let Some(cmd) = deferred {
                self.handle_control(cmd);
            }
        }
    }

    fn commit(&mut self, waiters: Vec<Waiter>, failure: Option<io::Error>) {
        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(waiters.len() as f64);
        let started = std::time::Instant::now();
        let outcome = match failure {
            Some(e) => Err(e),
            None => self.wal.sync(),
        };
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        // Every caller in a failed batch is told so; none of its frames may
        // reach a later sync.
        if outcome.is_err()
            && let Err(e) = self.wal.discard_pending()
        {
            tracing::error!("failed WAL batch could not be rolled back, refusing further writes: {e}");
        }
        for done in waiters {
            let _ = done.send(match &outcome {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }
    }

    fn handle_control(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Rewrite { snapshot, done } => {
                let _ = done.send(self.wal.rewrite(&snapshot));
            }
            WalCommand::AppendedSinceRewrite { done } => {
                let _ = done.send(self.wal.appended());
            }
            WalCommand::Append { .. } => unreachable!("appends are batched by run()"),
        }
    }
}

/// The scheduling core: slot registry, booking engine and notification
/// ledger over one durable store.
pub struct Engine {
    pub(super) store: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold it shared; compaction holds it exclusively so the
    /// snapshot and the log swap see the same state.
    commit_gate: RwLock<()>,
    pub(super) locks: Arc<dyn LockManager>,
    pub(super) cache: SlotCache,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
}

impl Engine {
    /// Open (or create) the WAL at `wal_path`, replay it, and start the
    /// writer task. Uses in-process locks and an in-memory slot cache.
    pub fn new(
        wal_path: PathBuf,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        Self::with_parts(
            wal_path,
            config,
            clock,
            Arc::new(LocalLocks::new()),
            Arc::new(MemoryCache::new()),
        )
    }

    pub fn with_parts(
        wal_path: PathBuf,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        locks: Arc<dyn LockManager>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> io::Result<Self> {
        let store = InMemoryStore::new();
        let events = Wal::replay(&wal_path)?;
        for event in &events {
            store.apply_event(event);
        }
        let wal = Wal::open(&wal_path)?;
        info!("replayed {} events from {}", events.len(), wal.path().display());

        let (wal_tx, rx) = mpsc::channel(4096);
        tokio::spawn(WalWriter { wal, rx }.run());

        Ok(Self {
            store,
            wal_tx,
            commit_gate: RwLock::new(()),
            locks,
            cache: SlotCache::new(cache_backend, config.cache_ttl),
            clock,
            config,
        })
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (done, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                done,
            })
            .await
            .map_err(|_| EngineError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transient("WAL writer dropped response".into()))?
            .map_err(EngineError::from)
    }

    /// Make `event` durable, then apply it. Nothing is applied if the write fails.
    pub(super) async fn commit(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.store.apply_event(&event);
        Ok(())
    }

    /// Acquire exclusive scopes for every key, in sorted order so two
    /// callers with overlapping key sets can't deadlock.
    pub(super) async fn lock_scopes(&self, keys: &[Ulid]) -> Result<Vec<ScopedLock>, EngineError> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = tokio::time::timeout(
                self.config.lock_timeout,
                self.locks.acquire_exclusive(key),
            )
            .await
            .map_err(|_| EngineError::Transient(format!("timed out waiting for lock on {key}")))?;
            held.push(lock);
        }
        Ok(held)
    }

    /// Rewrite the WAL as a snapshot of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let snapshot = self.store.snapshot();
        let (done, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Rewrite { snapshot, done })
            .await
            .map_err(|_| EngineError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transient("WAL writer dropped response".into()))?
            .map_err(EngineError::from)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (done, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendedSinceRewrite { done })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
