/// Database model definitions.
pub mod models;
/// Room, code registry and wallet persistence.
pub mod room_store;
/// Storage abstraction layer for database operations.
pub mod storage;
