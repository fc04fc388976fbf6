//! Mock persistence backend for testing write-behind stores.
//!
//! [`MockRepository`] implements [`TargetRepository`] entirely in memory,
//! records every save, and can be told to fail so that retry behavior can
//! be exercised.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use repairbus_core::error::{Error, Result};
use repairbus_core::store::TargetRepository;
use repairbus_core::types::UnitTarget;

/// An in-memory [`TargetRepository`] with injectable failures.
#[derive(Debug, Default)]
pub struct MockRepository {
    records: Mutex<Vec<UnitTarget>>,
    saves: Mutex<Vec<UnitTarget>>,
    fail_saves: AtomicBool,
}

impl MockRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository whose `load_all` returns `records`.
    pub fn preloaded(records: Vec<UnitTarget>) -> Self {
        MockRepository {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    /// Every record passed to `save`, in call order.
    pub fn saved(&self) -> Vec<UnitTarget> {
        self.saves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make subsequent `save` calls fail until turned off again.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TargetRepository for MockRepository {
    async fn load_all(&self) -> Result<Vec<UnitTarget>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, target: &UnitTarget) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Store("mock save failure".into()));
        }
        self.saves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*target);
        Ok(())
    }
}
