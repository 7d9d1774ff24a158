pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;

use crate::dao::models::{
    CodeReservationEntity, CodeStatus, DebitOutcome, LedgerEntry, RoomEntity, WalletEntity,
    WalletTransactionEntity,
};
use crate::dao::storage::StorageResult;
use crate::state::room::GameType;

/// Abstraction over the durable room, code registry and wallet tables.
pub trait RoomStore: Send + Sync {
    /// Open a unit of work. Every currency movement happens inside one.
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn UnitOfWork>>>;
    /// Read the room currently identified by `code` without locking it.
    fn find_room(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Public rooms still collecting participants, newest first.
    fn list_open_rooms(
        &self,
        game_type: Option<GameType>,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;
    /// Non-terminal rooms whose last activity is older than `idle_since`.
    fn find_stale_rooms(
        &self,
        idle_since: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;
    /// Latest registry row for `code`.
    fn find_code(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<CodeReservationEntity>>>;
    /// Balances of a user, if the wallet exists.
    fn wallet(&self, user_id: &str) -> BoxFuture<'static, StorageResult<Option<WalletEntity>>>;
    /// Audit rows referencing a room code, oldest first.
    fn wallet_transactions(
        &self,
        reference: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<WalletTransactionEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// A single database transaction.
///
/// Rows returned by [`UnitOfWork::lock_room`] stay locked until the unit commits or
/// rolls back. Dropping a unit without committing rolls it back.
pub trait UnitOfWork: Send {
    /// Load and lock the room currently identified by `code`.
    ///
    /// Resolves the code through the active registry row first and falls back to the
    /// most recent room that carried it, so retired rooms are still reachable.
    fn lock_room<'a>(
        &'a mut self,
        code: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<RoomEntity>>>;
    /// Insert a brand-new room, locked for the rest of the unit.
    fn insert_room(&mut self, room: RoomEntity) -> BoxFuture<'_, StorageResult<()>>;
    /// Replace a room previously returned by `lock_room` or `insert_room`.
    fn update_room(&mut self, room: RoomEntity) -> BoxFuture<'_, StorageResult<()>>;
    /// Insert an active reservation. Returns `false` when the code is already active.
    fn reserve_code(
        &mut self,
        reservation: CodeReservationEntity,
    ) -> BoxFuture<'_, StorageResult<bool>>;
    /// Move the active reservation of `code` to a retired status.
    fn retire_code<'a>(
        &'a mut self,
        code: &'a str,
        status: CodeStatus,
    ) -> BoxFuture<'a, StorageResult<()>>;
    /// Atomically remove funds; never lets a balance go negative.
    fn debit(&mut self, entry: LedgerEntry) -> BoxFuture<'_, StorageResult<DebitOutcome>>;
    /// Atomically add funds.
    fn credit(&mut self, entry: LedgerEntry) -> BoxFuture<'_, StorageResult<()>>;
    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>>;
    fn rollback(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>>;
}
