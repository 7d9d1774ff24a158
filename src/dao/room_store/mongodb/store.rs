use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoCodeDocument, MongoRoomDocument, MongoWalletDocument, MongoWalletTransactionDocument,
        ROOM_CODES, ROOMS, WALLET_TRANSACTIONS, WALLETS, active_code_filter, open_statuses,
    },
    unit_of_work::MongoUnitOfWork,
};
use crate::{
    dao::{
        models::{
            CodeReservationEntity, CodeStatus, RoomEntity, WalletEntity, WalletTransactionEntity,
        },
        room_store::{RoomStore, UnitOfWork},
        storage::StorageResult,
    },
    state::room::{GameType, RoomStatus},
};

/// MongoDB backed room store. Units of work map onto multi-document transactions,
/// so the deployment must be a replica set.
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let indexes: [(&'static str, &'static str, Document, IndexOptions); 5] = [
            (
                ROOM_CODES,
                "code_active_unique_idx",
                doc! { "code": 1 },
                IndexOptions::builder()
                    .name(Some("code_active_unique_idx".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(active_code_filter_expression()))
                    .build(),
            ),
            (
                ROOM_CODES,
                "code_history_idx",
                doc! { "code": 1, "reserved_at": -1 },
                IndexOptions::builder()
                    .name(Some("code_history_idx".to_owned()))
                    .build(),
            ),
            (
                ROOMS,
                "room_code_idx",
                doc! { "code": 1, "created_at": -1 },
                IndexOptions::builder()
                    .name(Some("room_code_idx".to_owned()))
                    .build(),
            ),
            (
                ROOMS,
                "room_activity_idx",
                doc! { "status": 1, "last_activity_at": 1 },
                IndexOptions::builder()
                    .name(Some("room_activity_idx".to_owned()))
                    .build(),
            ),
            (
                WALLET_TRANSACTIONS,
                "wallet_tx_reference_idx",
                doc! { "reference": 1, "created_at": 1 },
                IndexOptions::builder()
                    .name(Some("wallet_tx_reference_idx".to_owned()))
                    .build(),
            ),
        ];

        for (collection, index, keys, options) in indexes {
            let model = IndexModel::builder().keys(keys).options(options).build();
            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
            debug!(collection, index, "MongoDB index ensured");
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database().await.collection(ROOMS)
    }

    async fn begin(&self) -> MongoResult<MongoUnitOfWork> {
        let (client, database) = {
            let guard = self.inner.state.read().await;
            (guard.client.clone(), guard.database.clone())
        };
        MongoUnitOfWork::start(&client, database).await
    }

    async fn find_room(&self, code: &str) -> MongoResult<Option<RoomEntity>> {
        let database = self.database().await;
        let load_err = |source| MongoDaoError::LoadRoom {
            code: code.to_owned(),
            source,
        };

        let active = database
            .collection::<MongoCodeDocument>(ROOM_CODES)
            .find_one(active_code_filter(code))
            .await
            .map_err(load_err)?;

        let rooms = database.collection::<MongoRoomDocument>(ROOMS);
        let document = match active {
            Some(reservation) => rooms
                .find_one(doc! { "_id": reservation.room_id() })
                .await
                .map_err(load_err)?,
            None => rooms
                .find_one(doc! { "code": code })
                .sort(doc! { "created_at": -1 })
                .await
                .map_err(load_err)?,
        };

        document.map(RoomEntity::try_from).transpose()
    }

    async fn list_open_rooms(&self, game_type: Option<GameType>) -> MongoResult<Vec<RoomEntity>> {
        let mut filter = doc! {
            "is_public": true,
            "status": { "$in": [RoomStatus::Waiting.as_str(), RoomStatus::Ready.as_str()] },
        };
        if let Some(game_type) = game_type {
            filter.insert("game_type", game_type.as_str());
        }

        let documents: Vec<MongoRoomDocument> = self
            .rooms()
            .await
            .find(filter)
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?;

        let mut rooms = Vec::with_capacity(documents.len());
        for document in documents {
            let room = RoomEntity::try_from(document)?;
            if !room.is_full() {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    async fn find_stale_rooms(&self, idle_since: SystemTime) -> MongoResult<Vec<RoomEntity>> {
        let filter = doc! {
            "status": { "$in": open_statuses() },
            "last_activity_at": { "$lt": DateTime::from_system_time(idle_since) },
        };

        let documents: Vec<MongoRoomDocument> = self
            .rooms()
            .await
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?;

        documents.into_iter().map(RoomEntity::try_from).collect()
    }

    async fn find_code(&self, code: &str) -> MongoResult<Option<CodeReservationEntity>> {
        let document = self
            .database()
            .await
            .collection::<MongoCodeDocument>(ROOM_CODES)
            .find_one(doc! { "code": code })
            .sort(doc! { "reserved_at": -1 })
            .await
            .map_err(|source| MongoDaoError::LoadCode {
                code: code.to_owned(),
                source,
            })?;

        document.map(CodeReservationEntity::try_from).transpose()
    }

    async fn wallet(&self, user_id: &str) -> MongoResult<Option<WalletEntity>> {
        let document = self
            .database()
            .await
            .collection::<MongoWalletDocument>(WALLETS)
            .find_one(doc! { "_id": user_id })
            .await
            .map_err(|source| MongoDaoError::Wallet {
                user_id: user_id.to_owned(),
                source,
            })?;

        Ok(document.map(Into::into))
    }

    async fn wallet_transactions(
        &self,
        reference: &str,
    ) -> MongoResult<Vec<WalletTransactionEntity>> {
        let load_err = |source| MongoDaoError::WalletTransactions {
            reference: reference.to_owned(),
            source,
        };

        let documents: Vec<MongoWalletTransactionDocument> = self
            .database()
            .await
            .collection(WALLET_TRANSACTIONS)
            .find(doc! { "reference": reference })
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(load_err)?
            .try_collect()
            .await
            .map_err(load_err)?;

        documents
            .into_iter()
            .map(WalletTransactionEntity::try_from)
            .collect()
    }
}

fn active_code_filter_expression() -> Document {
    doc! { "status": CodeStatus::Active.as_str() }
}

impl RoomStore for MongoRoomStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn UnitOfWork>>> {
        let store = self.clone();
        Box::pin(async move {
            let unit: Box<dyn UnitOfWork> = Box::new(store.begin().await?);
            Ok(unit)
        })
    }

    fn find_room(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.find_room(&code).await.map_err(Into::into) })
    }

    fn list_open_rooms(
        &self,
        game_type: Option<GameType>,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_open_rooms(game_type).await.map_err(Into::into) })
    }

    fn find_stale_rooms(
        &self,
        idle_since: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_stale_rooms(idle_since).await.map_err(Into::into) })
    }

    fn find_code(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<CodeReservationEntity>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.find_code(&code).await.map_err(Into::into) })
    }

    fn wallet(&self, user_id: &str) -> BoxFuture<'static, StorageResult<Option<WalletEntity>>> {
        let store = self.clone();
        let user_id = user_id.to_owned();
        Box::pin(async move { store.wallet(&user_id).await.map_err(Into::into) })
    }

    fn wallet_transactions(
        &self,
        reference: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<WalletTransactionEntity>>> {
        let store = self.clone();
        let reference = reference.to_owned();
        Box::pin(async move {
            store
                .wallet_transactions(&reference)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
