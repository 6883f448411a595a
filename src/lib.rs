// lib.rs - 聊天机器人服务端的记录映射层，供插件与守护进程共用

pub mod core;
pub mod data;
pub mod models;
pub mod services;

pub use models::*;

pub use data::{
    descriptor, CacheConfig, ColumnMap, ColumnValue, DataError, DataManager, DatabaseConfig,
    Entity, FieldDef, FieldType, RawSql, RecordCache, RecordKey, SqlEnum, SqlTask, SqlValue,
    TaskBatch, WriteSync,
};
pub use services::change_queue::{
    ChangeQueueReconciler, ReconcileStats, ReconcilerConfig, RouteTable,
};

// 重新导出常用类型
pub use anyhow::{Context, Result};

pub use self::core::{init_logger, update_log_level};
