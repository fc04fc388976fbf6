//! Write-behind persistence for unit targets.
//!
//! [`WriteBehindStore`] keeps the authoritative in-memory copy of every
//! unit's last commanded target and defers durable writes to a background
//! flush task, so the poll loop never waits on the database. The flush
//! task blocks on a signal, then persists each address dirtied since the
//! previous round exactly once.
//!
//! [`NullTargetStore`] satisfies the same interface for installations that
//! run without a database, synthesizing a throwaway target per address.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use repairbus_core::error::Result;
use repairbus_core::store::{TargetRepository, TargetStore};
use repairbus_core::types::UnitTarget;

use crate::unit::generate_jumper_value;

/// Shared state between the store front and its flush task.
struct Inner {
    state: Mutex<State>,
    wakeup: Notify,
}

struct State {
    targets: HashMap<u8, UnitTarget>,
    dirty: HashSet<u8>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write-behind cache over a [`TargetRepository`].
///
/// `set` is synchronous and immediately visible to subsequent `get`s; the
/// durable write happens on the background flush task. Durability is
/// best-effort: a crash loses at most the targets dirtied since the last
/// completed flush round.
pub struct WriteBehindStore {
    inner: Arc<Inner>,
    repository: Arc<dyn TargetRepository>,
    cancel: CancellationToken,
    flush_task: JoinHandle<()>,
}

impl WriteBehindStore {
    /// Load all persisted targets from `repository` and start the flush
    /// task.
    pub async fn new(repository: Arc<dyn TargetRepository>) -> Result<Self> {
        let records = repository.load_all().await?;
        debug!(count = records.len(), "loaded persisted unit targets");

        let mut targets = HashMap::new();
        for record in records {
            targets.insert(record.address, record);
        }

        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                targets,
                dirty: HashSet::new(),
            }),
            wakeup: Notify::new(),
        });

        let cancel = CancellationToken::new();
        let flush_task = tokio::spawn(flush_loop(
            inner.clone(),
            repository.clone(),
            cancel.clone(),
        ));

        Ok(WriteBehindStore {
            inner,
            repository,
            cancel,
            flush_task,
        })
    }

    /// Run one flush round right now, persisting every currently-dirty
    /// address. Useful before shutdown; the background task makes calling
    /// this optional otherwise.
    pub async fn flush(&self) {
        flush_round(&self.inner, self.repository.as_ref()).await;
    }

    /// Number of addresses dirtied since the last completed flush round.
    pub fn dirty_len(&self) -> usize {
        self.inner.lock().dirty.len()
    }
}

impl TargetStore for WriteBehindStore {
    fn get(&self, address: u8) -> Option<UnitTarget> {
        self.inner.lock().targets.get(&address).copied()
    }

    fn set(&self, target: UnitTarget) {
        {
            let mut state = self.inner.lock();
            state.dirty.insert(target.address);
            state.targets.insert(target.address, target);
        }
        self.inner.wakeup.notify_one();
    }
}

impl Drop for WriteBehindStore {
    fn drop(&mut self) {
        // Graceful: let the flush task observe cancellation at its next
        // wait. Safety net: abort in case it is stuck inside a save.
        self.cancel.cancel();
        self.flush_task.abort();
    }
}

/// Background flush loop: wait for a signal, persist the dirty snapshot,
/// repeat.
async fn flush_loop(
    inner: Arc<Inner>,
    repository: Arc<dyn TargetRepository>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("flush task cancelled");
                break;
            }
            _ = inner.wakeup.notified() => {
                flush_round(&inner, repository.as_ref()).await;
            }
        }
    }
}

/// Persist every address dirtied up to this point exactly once.
///
/// The dirty set is snapshotted and cleared atomically before any save, so
/// an address written again mid-flush lands in the next round's snapshot
/// rather than being lost. A failed save re-marks its address dirty; it is
/// retried on the next signal, and the poll loop never sees the error.
async fn flush_round(inner: &Inner, repository: &dyn TargetRepository) {
    let batch: Vec<UnitTarget> = {
        let mut state = inner.lock();
        let addresses: Vec<u8> = state.dirty.drain().collect();
        addresses
            .iter()
            .filter_map(|addr| state.targets.get(addr).copied())
            .collect()
    };

    for target in batch {
        if let Err(e) = repository.save(&target).await {
            warn!(
                address = target.address,
                error = %e,
                "failed to persist unit target, will retry on next flush"
            );
            inner.lock().dirty.insert(target.address);
        }
    }
}

/// No-op persistence for installations without a database.
///
/// Every `get` synthesizes a default target: zero resistor code and a
/// fresh random jumper pattern. Nothing is ever stored.
pub struct NullTargetStore;

impl TargetStore for NullTargetStore {
    fn get(&self, address: u8) -> Option<UnitTarget> {
        Some(UnitTarget {
            address,
            resistor_code: 0,
            jumper_value: generate_jumper_value(&mut rand::thread_rng()),
        })
    }

    fn set(&self, _target: UnitTarget) {}
}
