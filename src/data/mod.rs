//! 记录映射层
//!
//! 插件通过本层读写持久化状态：按实体类型生成参数化 SQL、在存储之上叠加旁路缓存、
//! 把多条写入合并为原子事务，并配合变更队列修正外部写入造成的缓存偏差。
//!
//! # 模块组织
//!
//! - `error`: 统一错误类型定义
//! - `value`: 列值、哨兵与类型转换
//! - `entity`: 实体描述与全局注册表
//! - `sql`: 参数化语句构建（SQLite / SQL Server）
//! - `store`: 存储桥（内置 SQLite 实现）
//! - `cache`: 缓存后端（LRU + 不缓存策略）
//! - `record_cache`: 记录缓存协调器
//! - `batch`: 事务任务批次
//! - `manager`: 统一入口 `DataManager`

pub mod batch;
pub mod cache;
pub mod entity;
pub mod error;
pub mod manager;
pub mod record_cache;
pub mod sql;
pub mod store;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;


pub use batch::{CacheIntent, SqlTask, TaskBatch};
pub use entity::{descriptor, Entity, EntityDescriptor, FieldDef, RecordKey};
pub use error::{DataError, Result};
pub use manager::{CacheConfig, DataManager, DatabaseConfig};
pub use record_cache::{RecordCache, WriteSync};
pub use value::{ColumnMap, ColumnValue, FieldType, RawSql, SqlEnum, SqlValue};
