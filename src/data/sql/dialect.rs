//! SQL 方言
//!
//! 只覆盖本层实际生成的语句差异，不追求完整的方言抽象。

use super::TableName;
use serde::{Deserialize, Serialize};

/// SQL 方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite（内置存储桥使用）
    #[default]
    Sqlite,
    /// SQL Server
    SqlServer,
}

impl Dialect {
    /// 引用标识符
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", ident),
            Dialect::SqlServer => format!("[{}]", ident),
        }
    }

    /// 引用表名（含架构前缀）
    pub fn quote_table(self, table: &TableName) -> String {
        match table.schema() {
            Some(schema) => format!(
                "{}.{}",
                self.quote_ident(schema),
                self.quote_ident(table.name())
            ),
            None => self.quote_ident(table.name()),
        }
    }

    /// 存储端当前时间表达式
    pub fn now_expr(self) -> &'static str {
        match self {
            Dialect::Sqlite => "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            Dialect::SqlServer => "GETDATE()",
        }
    }

    /// 存储端新标识表达式
    pub fn new_id_expr(self) -> &'static str {
        match self {
            Dialect::Sqlite => "lower(hex(randomblob(16)))",
            Dialect::SqlServer => "NEWID()",
        }
    }

    /// 行锁提示（SQLite 依赖 IMMEDIATE 事务加锁，无需提示）
    pub fn row_lock_hint(self) -> &'static str {
        match self {
            Dialect::Sqlite => "",
            Dialect::SqlServer => " WITH (UPDLOCK, ROWLOCK)",
        }
    }

    /// 输出子句中引用新插入/删除行的前缀
    pub(crate) fn output_column(self, pseudo_table: &str, column: &str) -> String {
        match self {
            Dialect::Sqlite => self.quote_ident(column),
            Dialect::SqlServer => format!("{}.{}", pseudo_table, self.quote_ident(column)),
        }
    }
}
