// 变更队列数据模型

use crate::data::store::Row;
use crate::data::SqlValue;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 协调器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// `false` 时守护进程不启动协调循环
    pub enabled: bool,
    /// 轮询间隔（毫秒）
    pub interval_ms: u64,
    /// 每轮最多认领的行数
    pub batch_size: usize,
    /// 变更队列表名（可带架构前缀）
    pub table: String,
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            batch_size: 100,
            table: "ChangeQueue".to_string(),
        }
    }
}

/// 已认领（已从队列删除）的变更行
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRow {
    pub table_name: String,
    pub record_id: SqlValue,
    /// 复合主键的第二个值
    pub record_id2: Option<SqlValue>,
    pub field_name: String,
    /// 外部写入者记录的新值，仅用于日志，缓存始终以存储为准
    pub new_value: Option<String>,
}

impl ChangeRow {
    /// 从认领语句返回的行构造，缺少必需列时返回 `None`
    pub fn from_row(row: &Row) -> Option<Self> {
        let table_name = present(row, "TableName")?.key_fragment();
        let record_id = present(row, "RecordId")?.clone();
        let field_name = present(row, "FieldName")?.key_fragment();

        Some(Self {
            table_name,
            record_id,
            record_id2: present(row, "RecordId2").cloned(),
            field_name,
            new_value: present(row, "NewValue").map(SqlValue::key_fragment),
        })
    }
}

// NULL 与空白文本都视为缺失
fn present<'a>(row: &'a Row, column: &str) -> Option<&'a SqlValue> {
    row.get(column).filter(|value| match value {
        SqlValue::Null => false,
        SqlValue::Text(s) => !s.trim().is_empty(),
        _ => true,
    })
}

/// 单轮协调统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// 认领并删除的行数
    pub claimed: usize,
    /// 已同步到缓存的行数
    pub applied: usize,
    /// 未映射或无效而丢弃的行数
    pub dropped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<SqlValue>) -> Row {
        Row::new(
            ["TableName", "RecordId", "RecordId2", "FieldName", "NewValue"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            values,
        )
    }

    #[test]
    fn test_from_row_single_key() {
        let change = ChangeRow::from_row(&row(vec![
            "user_wallet".into(),
            "42".into(),
            SqlValue::Null,
            "Balance".into(),
            "1200".into(),
        ]))
        .unwrap();

        assert_eq!(change.table_name, "user_wallet");
        assert_eq!(change.record_id, SqlValue::Text("42".to_string()));
        assert_eq!(change.record_id2, None);
        assert_eq!(change.new_value.as_deref(), Some("1200"));
    }

    #[test]
    fn test_from_row_blank_second_key_is_absent() {
        let change = ChangeRow::from_row(&row(vec![
            "group_member".into(),
            "1001".into(),
            " ".into(),
            "Credit".into(),
            SqlValue::Null,
        ]))
        .unwrap();
        assert_eq!(change.record_id2, None);
        assert_eq!(change.new_value, None);
    }

    #[test]
    fn test_from_row_requires_field_name() {
        assert!(ChangeRow::from_row(&row(vec![
            "user_wallet".into(),
            "42".into(),
            SqlValue::Null,
            SqlValue::Null,
            "1".into(),
        ]))
        .is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = ReconcilerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.table, "ChangeQueue");
    }
}
