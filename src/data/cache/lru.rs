//! 带逐项 TTL 的 LRU 缓存
//!
//! - 容量限制：超过容量淘汰最久未使用的项
//! - 逐项过期：每个条目携带自己的到期时间，读取时惰性清除
//!
//! 本身不加锁，由外层（`MemoryCache`）负责同步。

use linked_hash_map::LinkedHashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// TTL 过大导致到期时间溢出时使用的上限（约 100 年）
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// 到期时间溢出时截断为远期时间，而不是 panic
fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// LRU 缓存
///
/// `LinkedHashMap` 的顺序即使用顺序，队首为最久未使用。
#[derive(Debug)]
pub struct LruCache<K: Eq + Hash, V> {
    entries: LinkedHashMap<K, CacheEntry<V>>,
    capacity: usize,
    default_ttl: Duration,
}

impl<K: Eq + Hash, V> LruCache<K, V> {
    /// 创建缓存
    ///
    /// - `capacity`: 最大条目数（至少为 1）
    /// - `default_ttl`: `insert` 使用的生存时间
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: LinkedHashMap::new(),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// 读取未过期的值并刷新其使用位置；过期项在此处被移除
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = self.entries.get(key)?.is_expired(Instant::now());
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_refresh(key).map(|entry| &entry.value)
    }

    /// 可变借用未过期的值，保留原到期时间，只刷新使用位置
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let expired = self.entries.get(key)?.is_expired(Instant::now());
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_refresh(key).map(|entry| &mut entry.value)
    }

    /// 是否存在未过期的值（不刷新使用位置）
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(Instant::now()))
            .unwrap_or(false)
    }

    /// 以默认 TTL 写入
    pub fn insert(&mut self, key: K, value: V) {
        let ttl = self.default_ttl;
        self.insert_with_ttl(key, value, ttl);
    }

    /// 以指定 TTL 写入（覆盖旧值并重置到期时间）
    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Duration) {
        self.entries.remove(&key);
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: deadline(Instant::now(), ttl),
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// 清除所有已过期的项，返回清除数量
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        let live: LinkedHashMap<K, CacheEntry<V>> = std::mem::take(&mut self.entries)
            .into_iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .collect();
        self.entries = live;
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 调整容量，缩小时从最久未使用的项开始淘汰
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}
