//! 统一错误类型定义
//!
//! 使用 `thiserror` 定义记录映射层的所有错误类型。
//!
//! 错误分三类处理：
//! - 配置错误（`Config` / `InvalidIdentifier` / `UnknownField`）：同步立即失败，绝不降级为空操作
//! - 存储错误（`Database` / `Store`）：原样向调用方传播，本层不做重试
//! - 缓存/类型转换错误（`Coercion`）：在字段同步路径上被吞掉并记录日志

use thiserror::Error;

/// 记录映射层的统一错误类型
#[derive(Error, Debug)]
pub enum DataError {
    /// 配置错误（缺少主键声明、空的 INSERT/UPDATE 载荷、无 WHERE 的 UPDATE 等）
    #[error("配置错误: {0}")]
    Config(String),

    /// 非法标识符（表名/列名）
    #[error("非法标识符: {0}")]
    InvalidIdentifier(String),

    /// 实体未声明的字段
    #[error("实体 {table} 未声明字段: {field}")]
    UnknownField { table: String, field: String },

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    /// 其他存储桥错误（非 SQLite 实现使用）
    #[error("存储错误: {0}")]
    Store(String),

    /// JSON 序列化/反序列化错误
    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 值类型转换失败
    #[error("类型转换失败: {0}")]
    Coercion(#[from] crate::data::value::CoercionError),

    /// 并发错误
    #[error("并发错误: {0}")]
    Concurrency(String),
}

/// 便于与现有代码集成的类型别名
pub type Result<T> = std::result::Result<T, DataError>;

impl DataError {
    /// 构造配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 构造未知字段错误
    pub fn unknown_field(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            table: table.into(),
            field: field.into(),
        }
    }

    /// 是否属于配置错误（调用方不应重试）
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidIdentifier(_) | Self::UnknownField { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::value::{CoercionError, FieldType, SqlValue};

    #[test]
    fn test_error_display() {
        let err = DataError::Store("连接断开".to_string());
        assert_eq!(err.to_string(), "存储错误: 连接断开");
    }

    #[test]
    fn test_config_error_classification() {
        assert!(DataError::config("UPDATE 缺少 WHERE 条件").is_config());
        assert!(DataError::InvalidIdentifier("a;b".to_string()).is_config());
        assert!(DataError::unknown_field("UserWallet", "Foo").is_config());
        assert!(!DataError::Store("timeout".to_string()).is_config());
    }

    #[test]
    fn test_unknown_field_display() {
        let err = DataError::unknown_field("GroupMember", "Level");
        assert_eq!(err.to_string(), "实体 GroupMember 未声明字段: Level");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid json").unwrap_err();
        let err: DataError = json_err.into();
        assert!(matches!(err, DataError::Serialization(_)));
    }

    #[test]
    fn test_coercion_error_conversion() {
        let coercion: CoercionError = FieldType::Integer
            .coerce(&SqlValue::Text("abc".to_string()))
            .unwrap_err();
        let err: DataError = coercion.into();
        assert!(err.to_string().contains("类型转换失败"));
    }

    #[test]
    fn test_anyhow_conversion() {
        let err = DataError::Concurrency("test".to_string());
        let anyhow_err: anyhow::Error = err.into();
        assert!(anyhow_err.to_string().contains("并发错误"));
    }
}
