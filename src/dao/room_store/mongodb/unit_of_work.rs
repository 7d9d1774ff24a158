use std::{collections::HashSet, time::SystemTime};

use futures::future::BoxFuture;
use mongodb::{Client, ClientSession, Database, bson::doc, options::ReturnDocument};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    error::{MongoDaoError, MongoResult},
    models::{
        MongoCodeDocument, MongoRoomDocument, MongoWalletDocument, MongoWalletTransactionDocument,
        ROOM_CODES, ROOMS, WALLET_TRANSACTIONS, WALLETS, active_code_filter, doc_id,
    },
};
use crate::dao::{
    models::{
        CodeReservationEntity, CodeStatus, DebitOutcome, LedgerEntry, RoomEntity, WalletEntity,
        WalletTransactionEntity,
    },
    room_store::UnitOfWork,
    storage::{StorageError, StorageResult},
};

/// Unit of work backed by a MongoDB multi-document transaction.
///
/// Row locks are emulated by bumping `lock_seq` on the room document: any other
/// transaction writing the same room hits a write conflict and is retried whole.
pub struct MongoUnitOfWork {
    session: ClientSession,
    database: Database,
    locked_rooms: HashSet<Uuid>,
}

impl MongoUnitOfWork {
    pub(super) async fn start(client: &Client, database: Database) -> MongoResult<Self> {
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::StartTransaction { source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::StartTransaction { source })?;

        Ok(Self {
            session,
            database,
            locked_rooms: HashSet::new(),
        })
    }

    async fn resolve_room_id(&mut self, code: &str) -> MongoResult<Option<String>> {
        let load_err = |source| MongoDaoError::LoadRoom {
            code: code.to_owned(),
            source,
        };

        let active = self
            .database
            .collection::<MongoCodeDocument>(ROOM_CODES)
            .find_one(active_code_filter(code))
            .session(&mut self.session)
            .await
            .map_err(load_err)?;
        if let Some(reservation) = active {
            return Ok(Some(reservation.room_id().to_owned()));
        }

        let latest = self
            .database
            .collection::<MongoRoomDocument>(ROOMS)
            .find_one(doc! { "code": code })
            .sort(doc! { "created_at": -1 })
            .session(&mut self.session)
            .await
            .map_err(load_err)?;
        Ok(latest.map(|room| room.id().to_owned()))
    }

    async fn lock_room(&mut self, code: &str) -> MongoResult<Option<RoomEntity>> {
        let Some(room_id) = self.resolve_room_id(code).await? else {
            return Ok(None);
        };

        let document = self
            .database
            .collection::<MongoRoomDocument>(ROOMS)
            .find_one_and_update(
                doc! { "_id": room_id.as_str() },
                doc! { "$inc": { "lock_seq": 1 } },
            )
            .return_document(ReturnDocument::After)
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::LockRoom {
                code: code.to_owned(),
                source,
            })?;

        let Some(document) = document else {
            return Ok(None);
        };
        let room = RoomEntity::try_from(document)?;
        self.locked_rooms.insert(room.id);
        Ok(Some(room))
    }

    async fn insert_room(&mut self, room: RoomEntity) -> MongoResult<()> {
        let id = room.id;
        let document = MongoRoomDocument::from(room);
        self.database
            .collection::<MongoRoomDocument>(ROOMS)
            .insert_one(document)
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::SaveRoom {
                id: id.to_string(),
                source,
            })?;
        self.locked_rooms.insert(id);
        Ok(())
    }

    async fn update_room(&mut self, room: RoomEntity) -> MongoResult<()> {
        let id = room.id;
        let document = MongoRoomDocument::from(room);
        self.database
            .collection::<MongoRoomDocument>(ROOMS)
            .replace_one(doc_id(id), document)
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::SaveRoom {
                id: id.to_string(),
                source,
            })?;
        Ok(())
    }

    async fn reserve_code(&mut self, reservation: CodeReservationEntity) -> MongoResult<bool> {
        let code = reservation.code.clone();
        let reserve_err = |source| MongoDaoError::ReserveCode {
            code: code.clone(),
            source,
        };
        let collection = self
            .database
            .collection::<MongoCodeDocument>(ROOM_CODES);

        // A failed insert aborts the whole transaction, so probe first.
        let existing = collection
            .find_one(active_code_filter(&reservation.code))
            .session(&mut self.session)
            .await
            .map_err(reserve_err)?;
        if existing.is_some() {
            return Ok(false);
        }

        collection
            .insert_one(MongoCodeDocument::from(reservation))
            .session(&mut self.session)
            .await
            .map_err(reserve_err)?;
        Ok(true)
    }

    async fn retire_code(&mut self, code: &str, status: CodeStatus) -> MongoResult<()> {
        self.database
            .collection::<MongoCodeDocument>(ROOM_CODES)
            .update_one(
                active_code_filter(code),
                doc! { "$set": { "status": status.as_str() } },
            )
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::RetireCode {
                code: code.to_owned(),
                source,
            })?;
        Ok(())
    }

    async fn load_wallet(&mut self, user_id: &str) -> MongoResult<WalletEntity> {
        let document = self
            .database
            .collection::<MongoWalletDocument>(WALLETS)
            .find_one(doc! { "_id": user_id })
            .session(&mut self.session)
            .await
            .map_err(|source| MongoDaoError::Wallet {
                user_id: user_id.to_owned(),
                source,
            })?;

        Ok(document
            .map(WalletEntity::from)
            .unwrap_or_else(|| WalletEntity::empty(user_id)))
    }

    /// Apply a signed movement to a wallet and append its audit row.
    async fn apply(
        &mut self,
        entry: LedgerEntry,
        wallet: WalletEntity,
        delta: Decimal,
    ) -> MongoResult<()> {
        let wallet_err = |source| MongoDaoError::Wallet {
            user_id: entry.user_id.clone(),
            source,
        };

        let balance_before = wallet.balance(entry.currency);
        let mut updated = wallet;
        *updated.balance_mut(entry.currency) += delta;
        let balance_after = updated.balance(entry.currency);

        self.database
            .collection::<MongoWalletDocument>(WALLETS)
            .replace_one(doc! { "_id": entry.user_id.as_str() }, MongoWalletDocument::from(updated))
            .upsert(true)
            .session(&mut self.session)
            .await
            .map_err(wallet_err)?;

        let row = WalletTransactionEntity {
            id: Uuid::new_v4(),
            user_id: entry.user_id.clone(),
            kind: entry.kind,
            currency: entry.currency,
            amount: delta,
            balance_before,
            balance_after,
            reference: entry.reference.clone(),
            created_at: SystemTime::now(),
        };
        self.database
            .collection::<MongoWalletTransactionDocument>(WALLET_TRANSACTIONS)
            .insert_one(MongoWalletTransactionDocument::from(row))
            .session(&mut self.session)
            .await
            .map_err(wallet_err)?;
        Ok(())
    }

    async fn debit(&mut self, entry: LedgerEntry) -> MongoResult<DebitOutcome> {
        let wallet = self.load_wallet(&entry.user_id).await?;
        if wallet.balance(entry.currency) < entry.amount {
            return Ok(DebitOutcome::Insufficient);
        }
        let delta = -entry.amount;
        self.apply(entry, wallet, delta).await?;
        Ok(DebitOutcome::Applied)
    }

    async fn credit(&mut self, entry: LedgerEntry) -> MongoResult<()> {
        let wallet = self.load_wallet(&entry.user_id).await?;
        let delta = entry.amount;
        self.apply(entry, wallet, delta).await
    }

    async fn commit(mut self) -> MongoResult<()> {
        self.session
            .commit_transaction()
            .await
            .map_err(|source| MongoDaoError::Commit { source })
    }

    async fn rollback(mut self) -> MongoResult<()> {
        self.session
            .abort_transaction()
            .await
            .map_err(|source| MongoDaoError::Abort { source })
    }
}

impl UnitOfWork for MongoUnitOfWork {
    fn lock_room<'a>(
        &'a mut self,
        code: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<RoomEntity>>> {
        Box::pin(async move { MongoUnitOfWork::lock_room(self, code).await.map_err(Into::into) })
    }

    fn insert_room(&mut self, room: RoomEntity) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move { MongoUnitOfWork::insert_room(self, room).await.map_err(Into::into) })
    }

    fn update_room(&mut self, room: RoomEntity) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            if !self.locked_rooms.contains(&room.id) {
                return Err(StorageError::conflict(format!(
                    "room {} updated without holding its lock",
                    room.id
                )));
            }
            MongoUnitOfWork::update_room(self, room)
                .await
                .map_err(Into::into)
        })
    }

    fn reserve_code(
        &mut self,
        reservation: CodeReservationEntity,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        Box::pin(async move {
            MongoUnitOfWork::reserve_code(self, reservation)
                .await
                .map_err(Into::into)
        })
    }

    fn retire_code<'a>(
        &'a mut self,
        code: &'a str,
        status: CodeStatus,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            MongoUnitOfWork::retire_code(self, code, status)
                .await
                .map_err(Into::into)
        })
    }

    fn debit(&mut self, entry: LedgerEntry) -> BoxFuture<'_, StorageResult<DebitOutcome>> {
        Box::pin(async move { MongoUnitOfWork::debit(self, entry).await.map_err(Into::into) })
    }

    fn credit(&mut self, entry: LedgerEntry) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move { MongoUnitOfWork::credit(self, entry).await.map_err(Into::into) })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { MongoUnitOfWork::commit(*self).await.map_err(Into::into) })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { MongoUnitOfWork::rollback(*self).await.map_err(Into::into) })
    }
}
