use mongodb::error::{Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure};
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const WRITE_CONFLICT_CODE: i32 = 112;
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB deployment is neither a replica set nor sharded; transactions are unavailable")]
    TransactionsUnsupported,
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to open a transaction")]
    StartTransaction {
        #[source]
        source: MongoError,
    },
    #[error("failed to commit transaction")]
    Commit {
        #[source]
        source: MongoError,
    },
    #[error("failed to abort transaction")]
    Abort {
        #[source]
        source: MongoError,
    },
    #[error("failed to lock room `{code}`")]
    LockRoom {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save room `{id}`")]
    SaveRoom {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{code}`")]
    LoadRoom {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list rooms")]
    ListRooms {
        #[source]
        source: MongoError,
    },
    #[error("failed to reserve room code `{code}`")]
    ReserveCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to retire room code `{code}`")]
    RetireCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room code `{code}`")]
    LoadCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to update wallet of `{user_id}`")]
    Wallet {
        user_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load wallet transactions for `{reference}`")]
    WalletTransactions {
        reference: String,
        #[source]
        source: MongoError,
    },
    #[error("corrupt document `{id}` in `{collection}`: {message}")]
    CorruptDocument {
        collection: &'static str,
        id: String,
        message: String,
    },
}

impl MongoDaoError {
    fn mongo_source(&self) -> Option<&MongoError> {
        match self {
            MongoDaoError::InvalidUri { source, .. }
            | MongoDaoError::ClientConstruction { source }
            | MongoDaoError::InitialPing { source, .. }
            | MongoDaoError::HealthPing { source }
            | MongoDaoError::EnsureIndex { source, .. }
            | MongoDaoError::StartTransaction { source }
            | MongoDaoError::Commit { source }
            | MongoDaoError::Abort { source }
            | MongoDaoError::LockRoom { source, .. }
            | MongoDaoError::SaveRoom { source, .. }
            | MongoDaoError::LoadRoom { source, .. }
            | MongoDaoError::ListRooms { source }
            | MongoDaoError::ReserveCode { source, .. }
            | MongoDaoError::RetireCode { source, .. }
            | MongoDaoError::LoadCode { source, .. }
            | MongoDaoError::Wallet { source, .. }
            | MongoDaoError::WalletTransactions { source, .. } => Some(source),
            MongoDaoError::CorruptDocument { .. } | MongoDaoError::TransactionsUnsupported => None,
        }
    }

    /// Whether the failure aborted the transaction in a way a retry can fix.
    pub fn is_transient(&self) -> bool {
        let Some(source) = self.mongo_source() else {
            return false;
        };
        if source.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            return true;
        }
        match source.kind.as_ref() {
            ErrorKind::Command(command) => command.code == WRITE_CONFLICT_CODE,
            ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY_CODE,
            _ => false,
        }
    }
}
