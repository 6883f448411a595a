//! 缓存层
//!
//! - `lru`: 带逐项 TTL 的 LRU 容器
//! - `backend`: 缓存后端接口、进程内实现与不缓存策略

pub mod backend;
pub mod lru;

pub use backend::{CacheBackend, CacheStats, MemoryCache, NoCache};
pub use lru::LruCache;
