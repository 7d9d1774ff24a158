use std::{collections::HashMap, sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::store::{CodeSlot, MemoryInner};
use crate::{
    dao::{
        models::{
            CodeReservationEntity, CodeStatus, DebitOutcome, LedgerEntry, RoomEntity,
            WalletEntity, WalletTransactionEntity,
        },
        room_store::UnitOfWork,
        storage::{StorageError, StorageResult},
    },
    state::room::Currency,
};

/// Transaction over [`super::MemoryRoomStore`].
///
/// Room and wallet rows are locked with owned async mutex guards held until the
/// unit ends. Room writes and ledger movements are staged and applied under a single
/// table write lock on commit; code reservations are inserted immediately as pending
/// rows so concurrent units observe the uniqueness constraint.
pub struct MemoryUnitOfWork {
    id: Uuid,
    inner: Arc<MemoryInner>,
    room_guards: HashMap<Uuid, OwnedMutexGuard<()>>,
    wallet_guards: HashMap<String, OwnedMutexGuard<()>>,
    staged_rooms: HashMap<Uuid, RoomEntity>,
    staged_ledger: Vec<(LedgerEntry, Decimal)>,
    reserved_codes: Vec<String>,
    retired_codes: Vec<(String, CodeStatus)>,
    completed: bool,
}

impl MemoryUnitOfWork {
    pub(super) fn new(inner: Arc<MemoryInner>) -> Self {
        Self {
            id: Uuid::new_v4(),
            inner,
            room_guards: HashMap::new(),
            wallet_guards: HashMap::new(),
            staged_rooms: HashMap::new(),
            staged_ledger: Vec::new(),
            reserved_codes: Vec::new(),
            retired_codes: Vec::new(),
            completed: false,
        }
    }

    async fn lock_room_row(&mut self, id: Uuid) {
        if self.room_guards.contains_key(&id) {
            return;
        }
        let lock = Arc::clone(&self.inner.room_locks.entry(id).or_default());
        let guard = lock.lock_owned().await;
        self.room_guards.insert(id, guard);
    }

    async fn lock_wallet_row(&mut self, user_id: &str) {
        if self.wallet_guards.contains_key(user_id) {
            return;
        }
        let lock = Arc::clone(
            &self
                .inner
                .wallet_locks
                .entry(user_id.to_owned())
                .or_default(),
        );
        let guard = lock.lock_owned().await;
        self.wallet_guards.insert(user_id.to_owned(), guard);
    }

    fn staged_delta(&self, user_id: &str, currency: Currency) -> Decimal {
        self.staged_ledger
            .iter()
            .filter(|(entry, _)| entry.user_id == user_id && entry.currency == currency)
            .map(|(_, delta)| *delta)
            .sum()
    }

    fn staged_room_for_code(&self, code: &str) -> Option<Uuid> {
        self.staged_rooms
            .values()
            .filter(|room| room.code == code)
            .max_by_key(|room| room.created_at)
            .map(|room| room.id)
    }

    fn apply(&mut self) {
        let now = SystemTime::now();
        let mut tables = self.inner.tables.write();

        for code in self.reserved_codes.drain(..) {
            if let Some(slot) = tables.codes.get_mut(&code) {
                if slot.pending == Some(self.id) {
                    slot.pending = None;
                    slot.previous = None;
                }
            }
        }

        for (id, room) in self.staged_rooms.drain() {
            tables.rooms.insert(id, room);
        }

        for (code, status) in self.retired_codes.drain(..) {
            if let Some(slot) = tables.codes.get_mut(&code) {
                if slot.reservation.status == CodeStatus::Active {
                    slot.reservation.status = status;
                }
            }
        }

        for (entry, delta) in self.staged_ledger.drain(..) {
            let wallet = tables
                .wallets
                .entry(entry.user_id.clone())
                .or_insert_with(|| WalletEntity::empty(entry.user_id.clone()));
            let balance = wallet.balance_mut(entry.currency);
            let balance_before = *balance;
            *balance += delta;
            let balance_after = *balance;
            debug_assert!(
                balance_after >= Decimal::ZERO,
                "wallet {} went negative in {}",
                entry.user_id,
                entry.currency
            );
            tables.transactions.push(WalletTransactionEntity {
                id: Uuid::new_v4(),
                user_id: entry.user_id,
                kind: entry.kind,
                currency: entry.currency,
                amount: delta,
                balance_before,
                balance_after,
                reference: entry.reference,
                created_at: now,
            });
        }

        self.completed = true;
    }

    fn discard(&mut self) {
        let mut tables = self.inner.tables.write();
        for code in self.reserved_codes.drain(..) {
            let owned = tables
                .codes
                .get(&code)
                .is_some_and(|slot| slot.pending == Some(self.id));
            if !owned {
                continue;
            }
            if let Some(slot) = tables.codes.remove(&code) {
                if let Some(previous) = slot.previous {
                    tables.codes.insert(
                        code,
                        CodeSlot {
                            reservation: previous,
                            pending: None,
                            previous: None,
                        },
                    );
                }
            }
        }
        self.completed = true;
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.completed {
            self.discard();
        }
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn lock_room<'a>(
        &'a mut self,
        code: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<RoomEntity>>> {
        Box::pin(async move {
            let resolved = match self.staged_room_for_code(code) {
                Some(id) => Some(id),
                None => self.inner.tables.read().resolve_code(code),
            };
            let Some(id) = resolved else {
                return Ok(None);
            };

            self.lock_room_row(id).await;

            if let Some(room) = self.staged_rooms.get(&id) {
                return Ok(Some(room.clone()));
            }
            Ok(self.inner.tables.read().rooms.get(&id).cloned())
        })
    }

    fn insert_room(&mut self, room: RoomEntity) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.lock_room_row(room.id).await;
            self.staged_rooms.insert(room.id, room);
            Ok(())
        })
    }

    fn update_room(&mut self, room: RoomEntity) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            if !self.room_guards.contains_key(&room.id) {
                return Err(StorageError::conflict(format!(
                    "room `{}` updated without holding its lock",
                    room.id
                )));
            }
            self.staged_rooms.insert(room.id, room);
            Ok(())
        })
    }

    fn reserve_code(
        &mut self,
        reservation: CodeReservationEntity,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        Box::pin(async move {
            let mut tables = self.inner.tables.write();
            if tables
                .codes
                .get(&reservation.code)
                .is_some_and(CodeSlot::blocks_reservation)
            {
                return Ok(false);
            }

            let code = reservation.code.clone();
            let previous = tables.codes.remove(&code).map(|slot| slot.reservation);
            tables.codes.insert(
                code.clone(),
                CodeSlot {
                    reservation,
                    pending: Some(self.id),
                    previous,
                },
            );
            drop(tables);
            self.reserved_codes.push(code);
            Ok(true)
        })
    }

    fn retire_code<'a>(
        &'a mut self,
        code: &'a str,
        status: CodeStatus,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.retired_codes.push((code.to_owned(), status));
            Ok(())
        })
    }

    fn debit(&mut self, entry: LedgerEntry) -> BoxFuture<'_, StorageResult<DebitOutcome>> {
        Box::pin(async move {
            self.lock_wallet_row(&entry.user_id).await;

            let committed = self
                .inner
                .tables
                .read()
                .wallets
                .get(&entry.user_id)
                .map(|wallet| wallet.balance(entry.currency))
                .unwrap_or(Decimal::ZERO);
            let available = committed + self.staged_delta(&entry.user_id, entry.currency);

            if available < entry.amount {
                return Ok(DebitOutcome::Insufficient);
            }

            let delta = -entry.amount;
            self.staged_ledger.push((entry, delta));
            Ok(DebitOutcome::Applied)
        })
    }

    fn credit(&mut self, entry: LedgerEntry) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let delta = entry.amount;
            self.staged_ledger.push((entry, delta));
            Ok(())
        })
    }

    fn commit(mut self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        self.apply();
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }

    fn rollback(mut self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        self.discard();
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        dao::{
            models::LedgerKind,
            room_store::{RoomStore, memory::MemoryRoomStore},
        },
        state::room::GameType,
    };

    fn reservation(code: &str) -> CodeReservationEntity {
        CodeReservationEntity {
            code: code.into(),
            game_type: GameType::Cards,
            room_id: Uuid::new_v4(),
            status: CodeStatus::Active,
            reserved_at: SystemTime::now(),
        }
    }

    fn entry(user: &str, amount: Decimal) -> LedgerEntry {
        LedgerEntry {
            user_id: user.into(),
            currency: Currency::Coins,
            amount,
            kind: LedgerKind::Escrow,
            reference: "123456".into(),
        }
    }

    #[tokio::test]
    async fn pending_reservation_blocks_concurrent_units() {
        let store = MemoryRoomStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        assert!(first.reserve_code(reservation("111111")).await.unwrap());
        assert!(!second.reserve_code(reservation("111111")).await.unwrap());

        first.commit().await.unwrap();
        assert!(!second.reserve_code(reservation("111111")).await.unwrap());
    }

    #[tokio::test]
    async fn dropped_unit_releases_its_reservation() {
        let store = MemoryRoomStore::new();
        {
            let mut unit = store.begin().await.unwrap();
            assert!(unit.reserve_code(reservation("222222")).await.unwrap());
        }

        assert!(store.find_code("222222").await.unwrap().is_none());
        let mut unit = store.begin().await.unwrap();
        assert!(unit.reserve_code(reservation("222222")).await.unwrap());
    }

    #[tokio::test]
    async fn retired_code_can_be_reserved_again() {
        let store = MemoryRoomStore::new();
        let mut unit = store.begin().await.unwrap();
        unit.reserve_code(reservation("333333")).await.unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        unit.retire_code("333333", CodeStatus::Cancelled)
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        assert!(unit.reserve_code(reservation("333333")).await.unwrap());
        // Rolling back restores the retired row.
        unit.rollback().await.unwrap();
        let row = store.find_code("333333").await.unwrap().unwrap();
        assert_eq!(row.status, CodeStatus::Cancelled);
    }

    #[tokio::test]
    async fn debit_checks_staged_movements() {
        let store = MemoryRoomStore::new();
        store.fund_wallet("alice", Currency::Coins, dec!(150));

        let mut unit = store.begin().await.unwrap();
        assert_eq!(
            unit.debit(entry("alice", dec!(100))).await.unwrap(),
            DebitOutcome::Applied
        );
        assert_eq!(
            unit.debit(entry("alice", dec!(100))).await.unwrap(),
            DebitOutcome::Insufficient
        );
        unit.commit().await.unwrap();

        assert_eq!(store.balance("alice", Currency::Coins), dec!(50));
        let rows = store.wallet_transactions("123456").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].balance_before, dec!(150));
        assert_eq!(rows[0].balance_after, dec!(50));
    }

    #[tokio::test]
    async fn rolled_back_debit_leaves_balance_untouched() {
        let store = MemoryRoomStore::new();
        store.fund_wallet("bob", Currency::Coins, dec!(80));

        let mut unit = store.begin().await.unwrap();
        unit.debit(entry("bob", dec!(80))).await.unwrap();
        unit.rollback().await.unwrap();

        assert_eq!(store.balance("bob", Currency::Coins), dec!(80));
    }

    #[tokio::test]
    async fn wallet_lock_serializes_debits() {
        let store = MemoryRoomStore::new();
        store.fund_wallet("carol", Currency::Coins, dec!(100));

        let mut first = store.begin().await.unwrap();
        first.debit(entry("carol", dec!(100))).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                let outcome = second.debit(entry("carol", dec!(100))).await.unwrap();
                second.commit().await.unwrap();
                outcome
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.commit().await.unwrap();

        assert_eq!(contender.await.unwrap(), DebitOutcome::Insufficient);
        assert_eq!(store.balance("carol", Currency::Coins), dec!(0));
    }
}
