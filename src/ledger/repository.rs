//! Repository seam for ledger persistence operations.
//!
//! This trait keeps `TransferLedger`'s concrete API intact while allowing
//! the upload service to depend on an abstract data access boundary that
//! tests can substitute.

use async_trait::async_trait;
use uuid::Uuid;

use super::{Result, Transfer, TransferFilter, TransferLedger};

/// Data-access contract for transfer ledger operations.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// See [`TransferLedger::add_or_supersede`].
    async fn add_or_supersede(&self, transfer: Transfer) -> Result<Transfer>;

    /// See [`TransferLedger::update`].
    async fn update(&self, transfer: &Transfer) -> Result<()>;

    /// See [`TransferLedger::get`].
    async fn get(&self, id: Uuid) -> Result<Option<Transfer>>;

    /// See [`TransferLedger::find_one`].
    async fn find_one(&self, filter: &TransferFilter) -> Result<Option<Transfer>>;

    /// See [`TransferLedger::list`].
    async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>>;

    /// See [`TransferLedger::remove`].
    async fn remove(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
impl LedgerRepository for TransferLedger {
    async fn add_or_supersede(&self, transfer: Transfer) -> Result<Transfer> {
        TransferLedger::add_or_supersede(self, transfer).await
    }

    async fn update(&self, transfer: &Transfer) -> Result<()> {
        TransferLedger::update(self, transfer).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transfer>> {
        TransferLedger::get(self, id).await
    }

    async fn find_one(&self, filter: &TransferFilter) -> Result<Option<Transfer>> {
        TransferLedger::find_one(self, filter).await
    }

    async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        TransferLedger::list(self, filter).await
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        TransferLedger::remove(self, id).await
    }
}
