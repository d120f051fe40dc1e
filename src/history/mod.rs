//! 本地历史记录：数据模型、持久化适配器与存储

pub mod persistence;
pub mod record;
pub mod store;

pub use persistence::{FileBlobStore, MemoryBlobStore, PersistenceAdapter};
pub use record::{HistoricalRecord, Rating, RecordId, Transcript, project_label};
pub use store::HistoryStore;
