//! 统一数据管理入口
//!
//! 按配置打开存储、构建缓存后端，并对外提供记录缓存协调器、事务批次与变更队列协调器。
//!
//! # 使用示例
//!
//! ```rust
//! let manager = DataManager::open(&config.database, &config.cache)?;
//!
//! let wallet = manager.records().get_by_key::<UserWallet>(42)?;
//! manager.records().plus::<UserWallet>("Balance", 100, 42)?;
//!
//! let mut batch = manager.batch();
//! batch.plus::<UserWallet>("Balance", -50, 42)?;
//! batch.plus::<UserWallet>("Balance", 50, 43)?;
//! batch.execute()?;
//! ```

use crate::data::batch::TaskBatch;
use crate::data::cache::{CacheBackend, CacheStats, MemoryCache, NoCache};
use crate::data::record_cache::RecordCache;
use crate::data::store::SqliteStore;
use crate::data::{DataError, Result};
use crate::services::change_queue::{ChangeQueueReconciler, ReconcilerConfig, RouteTable};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 全局 DataManager
///
/// 进程启动时安装一次，插件通过 `DataManager::global()` 共享同一个缓存。
static GLOBAL_DATA_MANAGER: OnceCell<DataManager> = OnceCell::new();

/// 统一数据管理器
pub struct DataManager {
    store: Arc<SqliteStore>,
    cache: Arc<dyn CacheBackend>,
    records: Arc<RecordCache>,
    cache_config: CacheConfig,
}

impl DataManager {
    /// 打开数据库并按配置构建缓存
    pub fn open(database: &DatabaseConfig, cache: &CacheConfig) -> Result<Self> {
        let store = SqliteStore::open(&database.path, database.busy_timeout())?;
        Ok(Self::with_store(Arc::new(store), cache.clone()))
    }

    /// 使用已打开的存储
    pub fn with_store(store: Arc<SqliteStore>, cache_config: CacheConfig) -> Self {
        let cache: Arc<dyn CacheBackend> = if cache_config.enabled {
            Arc::new(MemoryCache::new(
                cache_config.capacity,
                cache_config.default_ttl(),
            ))
        } else {
            tracing::info!("记录缓存已禁用，所有读取直接访问存储");
            Arc::new(NoCache)
        };
        let records = Arc::new(RecordCache::new(store.clone(), cache.clone()));

        Self {
            store,
            cache,
            records,
            cache_config,
        }
    }

    /// 安装为全局实例（只能安装一次）
    pub fn install_global(self) -> Result<&'static DataManager> {
        GLOBAL_DATA_MANAGER
            .set(self)
            .map_err(|_| DataError::config("全局 DataManager 已安装"))?;
        GLOBAL_DATA_MANAGER
            .get()
            .ok_or_else(|| DataError::config("全局 DataManager 未安装"))
    }

    /// 获取全局实例
    pub fn global() -> Option<&'static DataManager> {
        GLOBAL_DATA_MANAGER.get()
    }

    pub fn records(&self) -> &Arc<RecordCache> {
        &self.records
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// 新建事务批次
    pub fn batch(&self) -> TaskBatch<'_> {
        self.records.batch()
    }

    /// 构建变更队列协调器（路由表需在此之前注册完整）
    pub fn reconciler(
        &self,
        routes: RouteTable,
        config: &ReconcilerConfig,
    ) -> Result<Arc<ChangeQueueReconciler>> {
        let reconciler = ChangeQueueReconciler::new(Arc::clone(&self.records), routes, config)?;
        Ok(Arc::new(reconciler))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache_config
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    pub path: PathBuf,
    /// 等待锁的最长时间（毫秒）
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        // 数据目录：~/.local/share/botstore/bot.db（各平台对应目录）
        let path = dirs::data_local_dir()
            .map(|dir| dir.join("botstore").join("bot.db"))
            .unwrap_or_else(|| PathBuf::from("bot.db"));
        Self {
            path,
            busy_timeout_ms: 5000,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// `false` 时使用不缓存策略
    pub enabled: bool,
    /// 最大条目数
    pub capacity: usize,
    /// 容器默认 TTL（秒）；记录缓存按实体声明的 TTL 写入
    pub default_ttl_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            default_ttl_secs: 300, // 5 分钟
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::{seed_wallet, test_store};
    use crate::models::UserWallet;
    use tempfile::TempDir;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.capacity, 10_000);
        assert_eq!(config.default_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_cache_config_uses_defaults() {
        let config: CacheConfig = toml::from_str("enabled = false").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.capacity, 10_000);
    }

    #[test]
    fn test_open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let database = DatabaseConfig {
            path: temp_dir.path().join("data").join("bot.db"),
            busy_timeout_ms: 100,
        };

        let manager = DataManager::open(&database, &CacheConfig::default()).unwrap();
        assert!(manager.store().db_path().exists());
        assert_eq!(manager.cache_config().capacity, 10_000);
    }

    #[test]
    fn test_disabled_cache_wires_no_cache() {
        let store = test_store();
        seed_wallet(&store, 1, 10);

        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let manager = DataManager::with_store(store, config);
        manager.records().get_by_key::<UserWallet>(1).unwrap();

        assert!(!manager.records().cache().is_enabled());
        assert_eq!(manager.cache_stats(), CacheStats::default());
    }

    #[test]
    fn test_batch_through_manager() {
        let store = test_store();
        seed_wallet(&store, 1, 10);
        let manager = DataManager::with_store(store, CacheConfig::default());

        let mut batch = manager.batch();
        batch.plus::<UserWallet>("Balance", 5, 1).unwrap();
        assert_eq!(batch.execute().unwrap(), vec![1]);

        let wallet = manager.records().get_by_key::<UserWallet>(1).unwrap().unwrap();
        assert_eq!(wallet.balance, 15);
        assert!(manager.cache_stats().misses >= 1);
    }
}
