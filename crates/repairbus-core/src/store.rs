//! Persistence trait seams for unit target data.
//!
//! Two layers are involved in remembering what each unit was last told to
//! be:
//!
//! - [`TargetStore`] is what the bus coordinator talks to from the poll
//!   path. It is synchronous and must answer immediately from memory.
//! - [`TargetRepository`] is the durable backend underneath a write-behind
//!   store (a database layer in production deployments). It only needs to
//!   bulk-load at startup and save one record at a time.
//!
//! `repairbus-master` provides a write-behind [`TargetStore`] over any
//! [`TargetRepository`], plus a no-op store for installations that run
//! without persistence.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::UnitTarget;

/// In-memory view of per-unit target data, consumed by the poll path.
///
/// `set` must be immediately visible to subsequent `get`s for the same
/// address; durability beyond that is an implementation concern.
pub trait TargetStore: Send + Sync {
    /// Fetch the last commanded target for `address`, if one is known.
    fn get(&self, address: u8) -> Option<UnitTarget>;

    /// Record a newly commanded target.
    fn set(&self, target: UnitTarget);
}

/// Durable backend for unit target records.
///
/// Mirrors the stored-procedure contract of the production database layer:
/// one bulk load at startup, one save per dirty address.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Load every persisted `(address, resistor, jumper)` record.
    async fn load_all(&self) -> Result<Vec<UnitTarget>>;

    /// Persist one record, overwriting any previous value for its address.
    async fn save(&self, target: &UnitTarget) -> Result<()>;
}
