mod store;
mod unit_of_work;

pub use store::MemoryRoomStore;
pub use unit_of_work::MemoryUnitOfWork;
