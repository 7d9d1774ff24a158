use std::{collections::HashMap, sync::Arc, time::SystemTime};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::unit_of_work::MemoryUnitOfWork;
use crate::{
    dao::{
        models::{
            CodeReservationEntity, CodeStatus, RoomEntity, WalletEntity, WalletTransactionEntity,
        },
        room_store::{RoomStore, UnitOfWork},
        storage::StorageResult,
    },
    state::room::{Currency, GameType, RoomStatus},
};

/// Process-local room store with the same transactional guarantees as the database
/// backends: row locks, staged writes and atomic commits.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
pub(super) struct MemoryInner {
    pub(super) tables: RwLock<Tables>,
    pub(super) room_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    pub(super) wallet_locks: DashMap<String, Arc<Mutex<()>>>,
}

#[derive(Default)]
pub(super) struct Tables {
    pub(super) rooms: HashMap<Uuid, RoomEntity>,
    pub(super) codes: HashMap<String, CodeSlot>,
    pub(super) wallets: HashMap<String, WalletEntity>,
    pub(super) transactions: Vec<WalletTransactionEntity>,
}

/// Registry row plus the bookkeeping needed to undo an uncommitted reservation.
pub(super) struct CodeSlot {
    pub(super) reservation: CodeReservationEntity,
    /// Unit of work that inserted `reservation` and has not committed yet.
    pub(super) pending: Option<Uuid>,
    /// Committed row replaced by a pending reservation.
    pub(super) previous: Option<CodeReservationEntity>,
}

impl CodeSlot {
    /// Row visible to readers outside the owning unit of work.
    fn committed(&self) -> Option<&CodeReservationEntity> {
        match self.pending {
            Some(_) => self.previous.as_ref(),
            None => Some(&self.reservation),
        }
    }

    /// Whether a new reservation must be refused.
    pub(super) fn blocks_reservation(&self) -> bool {
        self.pending.is_some() || self.reservation.status == CodeStatus::Active
    }
}

impl Tables {
    /// Resolve a code to the room that currently owns it, or the last room that did.
    pub(super) fn resolve_code(&self, code: &str) -> Option<Uuid> {
        let active = self
            .codes
            .get(code)
            .and_then(CodeSlot::committed)
            .filter(|reservation| reservation.status == CodeStatus::Active)
            .map(|reservation| reservation.room_id);

        active.or_else(|| {
            self.rooms
                .values()
                .filter(|room| room.code == code)
                .max_by_key(|room| room.created_at)
                .map(|room| room.id)
        })
    }
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit a wallet outside of any room, standing in for the external top-up flow.
    pub fn fund_wallet(&self, user_id: &str, currency: Currency, amount: Decimal) {
        let mut tables = self.inner.tables.write();
        let wallet = tables
            .wallets
            .entry(user_id.to_owned())
            .or_insert_with(|| WalletEntity::empty(user_id));
        *wallet.balance_mut(currency) += amount;
    }

    /// Committed snapshot of every wallet.
    pub fn wallets(&self) -> Vec<WalletEntity> {
        self.inner.tables.read().wallets.values().cloned().collect()
    }

    /// Committed snapshot of every room.
    pub fn rooms(&self) -> Vec<RoomEntity> {
        self.inner.tables.read().rooms.values().cloned().collect()
    }

    /// Committed balance of a user, zero when the wallet does not exist.
    pub fn balance(&self, user_id: &str, currency: Currency) -> Decimal {
        self.inner
            .tables
            .read()
            .wallets
            .get(user_id)
            .map(|wallet| wallet.balance(currency))
            .unwrap_or(Decimal::ZERO)
    }
}

impl RoomStore for MemoryRoomStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn UnitOfWork>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let unit: Box<dyn UnitOfWork> = Box::new(MemoryUnitOfWork::new(inner));
            Ok(unit)
        })
    }

    fn find_room(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let room = {
            let tables = self.inner.tables.read();
            tables
                .resolve_code(code)
                .and_then(|id| tables.rooms.get(&id).cloned())
        };
        Box::pin(async move { Ok(room) })
    }

    fn list_open_rooms(
        &self,
        game_type: Option<GameType>,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let mut rooms: Vec<RoomEntity> = self
            .inner
            .tables
            .read()
            .rooms
            .values()
            .filter(|room| room.is_public)
            .filter(|room| matches!(room.status, RoomStatus::Waiting | RoomStatus::Ready))
            .filter(|room| !room.is_full())
            .filter(|room| game_type.is_none_or(|game| room.game_type == game))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Box::pin(async move { Ok(rooms) })
    }

    fn find_stale_rooms(
        &self,
        idle_since: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let rooms: Vec<RoomEntity> = self
            .inner
            .tables
            .read()
            .rooms
            .values()
            .filter(|room| room.status.is_open() && room.last_activity_at < idle_since)
            .cloned()
            .collect();
        Box::pin(async move { Ok(rooms) })
    }

    fn find_code(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<CodeReservationEntity>>> {
        let reservation = self
            .inner
            .tables
            .read()
            .codes
            .get(code)
            .and_then(CodeSlot::committed)
            .cloned();
        Box::pin(async move { Ok(reservation) })
    }

    fn wallet(&self, user_id: &str) -> BoxFuture<'static, StorageResult<Option<WalletEntity>>> {
        let wallet = self.inner.tables.read().wallets.get(user_id).cloned();
        Box::pin(async move { Ok(wallet) })
    }

    fn wallet_transactions(
        &self,
        reference: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<WalletTransactionEntity>>> {
        let rows: Vec<WalletTransactionEntity> = self
            .inner
            .tables
            .read()
            .transactions
            .iter()
            .filter(|row| row.reference == reference)
            .cloned()
            .collect();
        Box::pin(async move { Ok(rows) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
