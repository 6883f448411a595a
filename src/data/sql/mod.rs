//! SQL 构建
//!
//! 纯函数：把列值映射与主键/过滤条件转换为参数化语句。
//! 除 `RawSql` 与调用方提供的过滤子句外，所有值都通过命名参数绑定。
//!
//! - `dialect`: 方言差异（标识符引用、分页、输出子句、时间/标识表达式）
//! - `builder`: SELECT / INSERT / UPDATE / EXISTS / DELETE 以及变更队列领取语句

pub mod builder;
pub mod dialect;

pub use builder::{
    build_claim_changes, build_delete, build_exists, build_increment, build_insert, build_select,
    build_update, Criteria, Filter, OrderBy, Page, SelectQuery, CHANGE_QUEUE_COLUMNS,
};
pub use dialect::Dialect;

use crate::data::value::SqlValue;
use crate::data::{DataError, Result};
use std::fmt;

/// 参数化语句
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    /// 命名参数（名称含 `@` 前缀）
    pub params: Vec<(String, SqlValue)>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// 追加命名参数
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// 按名称查找参数值
    pub fn param(&self, name: &str) -> Option<&SqlValue> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }
}

/// 表名（可带架构前缀）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, name: &str) -> Result<Self> {
        if let Some(schema) = schema {
            validate_ident(schema)?;
        }
        validate_ident(name)?;
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// 解析 `schema.table` 或 `table`
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.split_once('.') {
            Some((schema, name)) => Self::new(Some(schema), name),
            None => Self::new(None, qualified),
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// 校验标识符：非空，仅含字母数字与下划线，且不以数字开头
pub fn validate_ident(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(DataError::InvalidIdentifier(ident.to_string()))
    }
}
