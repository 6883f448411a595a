//! 缓存后端
//!
//! 键为字符串，值为 JSON（整条记录或单个字段），每个键有自己的 TTL。
//! 缓存层的失败不影响业务写入：后端方法不返回缓存自身的错误，
//! 只有 `get_or_add` 会把加载函数的错误原样传回。

use super::lru::LruCache;
use crate::data::Result;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// 加载锁分段数
const LOAD_LOCK_STRIPES: usize = 16;

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `get_or_add` 实际调用加载函数的次数
    pub loads: u64,
    pub entries: usize,
}

/// 缓存后端
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<JsonValue>;

    fn set(&self, key: &str, value: JsonValue, ttl: Duration);

    fn remove(&self, key: &str);

    /// 改写已缓存对象中的单个字段，保留条目原有的到期时间。
    /// 条目不存在、已过期或不是对象时返回 `false`（非对象条目会被移除）。
    fn set_field(&self, key: &str, field: &str, value: JsonValue) -> bool;

    /// 原子的读取或加载：同一个键的并发未命中只会调用一次加载函数。
    /// 加载结果为 `None` 时不写入缓存。
    fn get_or_add(
        &self,
        key: &str,
        ttl: Duration,
        loader: &mut dyn FnMut() -> Result<Option<JsonValue>>,
    ) -> Result<Option<JsonValue>>;

    /// `false` 表示不缓存策略，调用方可跳过字段同步等纯缓存工作
    fn is_enabled(&self) -> bool {
        true
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    /// 主动清除已过期条目，返回清除数量
    fn purge_expired(&self) -> usize {
        0
    }
}

/// 进程内 LRU 缓存
pub struct MemoryCache {
    entries: Mutex<LruCache<String, JsonValue>>,
    load_locks: Vec<Mutex<()>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
}

impl MemoryCache {
    /// - `capacity`: 最大条目数
    /// - `default_ttl`: 仅用于 LRU 内部默认值，写入时总是显式给出 TTL
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity, default_ttl)),
            load_locks: (0..LOAD_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    // 缓存内容可以丢弃重建，锁中毒后继续使用内部数据
    fn entries(&self) -> MutexGuard<'_, LruCache<String, JsonValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.load_locks.len();
        self.load_locks[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<JsonValue> {
        self.entries().get(&key.to_string()).cloned()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<JsonValue> {
        let value = self.lookup(key);
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    fn set(&self, key: &str, value: JsonValue, ttl: Duration) {
        self.entries().insert_with_ttl(key.to_string(), value, ttl);
    }

    fn remove(&self, key: &str) {
        self.entries().remove(&key.to_string());
    }

    fn set_field(&self, key: &str, field: &str, value: JsonValue) -> bool {
        let key = key.to_string();
        let mut entries = self.entries();
        let Some(cached) = entries.get_mut(&key) else {
            return false;
        };
        match cached.as_object_mut() {
            Some(object) => {
                object.insert(field.to_string(), value);
                true
            }
            None => {
                entries.remove(&key);
                false
            }
        }
    }

    fn get_or_add(
        &self,
        key: &str,
        ttl: Duration,
        loader: &mut dyn FnMut() -> Result<Option<JsonValue>>,
    ) -> Result<Option<JsonValue>> {
        if let Some(value) = self.get(key) {
            return Ok(Some(value));
        }

        let _guard = self.load_lock(key);

        // 等锁期间可能已被其他线程加载
        if let Some(value) = self.lookup(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(value));
        }

        self.loads.fetch_add(1, Ordering::Relaxed);
        let loaded = loader()?;
        if let Some(value) = &loaded {
            self.set(key, value.clone(), ttl);
        }
        Ok(loaded)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn purge_expired(&self) -> usize {
        self.entries().purge_expired()
    }
}

/// 不缓存策略：所有读取都未命中，写入与删除为空操作
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheBackend for NoCache {
    fn get(&self, _key: &str) -> Option<JsonValue> {
        None
    }

    fn set(&self, _key: &str, _value: JsonValue, _ttl: Duration) {}

    fn remove(&self, _key: &str) {}

    fn set_field(&self, _key: &str, _field: &str, _value: JsonValue) -> bool {
        false
    }

    fn get_or_add(
        &self,
        _key: &str,
        _ttl: Duration,
        loader: &mut dyn FnMut() -> Result<Option<JsonValue>>,
    ) -> Result<Option<JsonValue>> {
        loader()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
