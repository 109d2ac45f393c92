//! Persistence and cache gateway: the read-through cache, the durable
//! primary store, and the orchestration layer tying the two into a
//! single read/write/flush/grace-recovery API for game-node code.

pub mod cache;
pub mod document;
pub mod gateway;
pub mod store;

pub use cache::{Cache, Presence};
pub use document::PlayerDocument;
pub use gateway::{FlushPolicy, LoginError, PersistenceGateway};
pub use store::{FjallStore, InMemoryStore, PrimaryStore, StoreBackendConfig, StoreError, StoreFactory};
