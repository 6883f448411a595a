//! 列值模型与类型转换
//!
//! - `SqlValue`：可绑定到参数的标量值
//! - `ColumnValue`：写入列时的取值，除绑定值外还包括两个哨兵（由存储端生成时间/标识）
//!   以及唯一允许原始 SQL 片段进入语句的 `RawSql`
//! - `FieldType`：字段类型标签，驱动一组封闭的转换函数，失败时返回可恢复的 `CoercionError`

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use linked_hash_map::LinkedHashMap;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

/// 可绑定的标量值
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// 从枚举构造（使用其底层整数值）
    pub fn from_enum<E: SqlEnum>(value: E) -> Self {
        SqlValue::Integer(value.to_sql_int())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 渲染为缓存键片段
    pub fn key_fragment(&self) -> String {
        match self {
            SqlValue::Null => "null".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Blob(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
        }
    }

    /// 从 rusqlite 的原始值转换
    pub fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(s) => SqlValue::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            other => write!(f, "{}", other.key_fragment()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// 以整数形式存储的枚举
pub trait SqlEnum: Copy {
    fn to_sql_int(self) -> i64;
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(if value { 1 } else { 0 })
    }
}

macro_rules! impl_integer_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    SqlValue::Integer(i64::from(value))
                }
            }
        )*
    };
}

impl_integer_from!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

// 空字符串保持为空字符串，不转成 NULL
impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(value: &[u8]) -> Self {
        SqlValue::Blob(value.to_vec())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Text(value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// 原始 SQL 片段
///
/// 仅用于 `col = col + 1`、服务端函数调用这类需要直接写入表达式的场景，
/// 调用方自行保证片段安全。这是语句中唯一允许出现原始文本的地方。
#[derive(Debug, Clone, PartialEq)]
pub struct RawSql(String);

impl RawSql {
    pub fn trusted(fragment: impl Into<String>) -> Self {
        Self(fragment.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 写入列时的取值
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// 普通绑定参数
    Bind(SqlValue),
    /// 未设置的时间：由存储端填入当前时间
    Now,
    /// 未设置的标识：由存储端生成新标识
    NewId,
    /// 原始 SQL 片段
    Raw(RawSql),
}

impl From<SqlValue> for ColumnValue {
    fn from(value: SqlValue) -> Self {
        ColumnValue::Bind(value)
    }
}

impl From<RawSql> for ColumnValue {
    fn from(value: RawSql) -> Self {
        ColumnValue::Raw(value)
    }
}

macro_rules! impl_column_value_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ColumnValue {
                fn from(value: $ty) -> Self {
                    ColumnValue::Bind(SqlValue::from(value))
                }
            }
        )*
    };
}

impl_column_value_from!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f64,
    &str,
    String,
    Vec<u8>,
    &[u8],
    DateTime<Utc>
);

impl<T: Into<SqlValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        ColumnValue::Bind(SqlValue::from(value))
    }
}

/// 列名到列值的映射（保持插入顺序，生成的 SQL 文本稳定）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap(LinkedHashMap<String, ColumnValue>);

impl ColumnMap {
    pub fn new() -> Self {
        Self(LinkedHashMap::new())
    }

    /// 链式设置列值
    pub fn with(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<ColumnValue>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.0.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<ColumnValue> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// 类型转换失败（可恢复）
#[derive(Error, Debug, Clone, PartialEq)]
#[error("无法将 {value} 转换为 {target:?}")]
pub struct CoercionError {
    pub target: FieldType,
    pub value: String,
}

impl CoercionError {
    fn new(target: FieldType, value: &SqlValue) -> Self {
        Self {
            target,
            value: value.to_string(),
        }
    }
}

/// 字段类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Integer,
    Real,
    Text,
    Blob,
    /// 以 RFC 3339 文本存储的 UTC 时间
    DateTime,
}

impl FieldType {
    /// 将存储值规范化为该类型的存储表示，NULL 始终保持为 NULL
    pub fn coerce(self, value: &SqlValue) -> Result<SqlValue, CoercionError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let fail = || CoercionError::new(self, value);

        match self {
            FieldType::Bool => coerce_bool(value).map(SqlValue::from).ok_or_else(fail),
            FieldType::Integer => value.as_i64().map(SqlValue::Integer).ok_or_else(fail),
            FieldType::Real => match value {
                SqlValue::Integer(i) => Ok(SqlValue::Real(*i as f64)),
                SqlValue::Real(f) => Ok(SqlValue::Real(*f)),
                SqlValue::Text(s) => s.trim().parse().map(SqlValue::Real).map_err(|_| fail()),
                _ => Err(fail()),
            },
            FieldType::Text => match value {
                SqlValue::Text(s) => Ok(SqlValue::Text(s.clone())),
                SqlValue::Integer(i) => Ok(SqlValue::Text(i.to_string())),
                SqlValue::Real(f) => Ok(SqlValue::Text(f.to_string())),
                SqlValue::Blob(b) => String::from_utf8(b.clone())
                    .map(SqlValue::Text)
                    .map_err(|_| fail()),
                SqlValue::Null => Ok(SqlValue::Null),
            },
            FieldType::Blob => match value {
                SqlValue::Blob(b) => Ok(SqlValue::Blob(b.clone())),
                SqlValue::Text(s) => Ok(SqlValue::Blob(s.as_bytes().to_vec())),
                _ => Err(fail()),
            },
            FieldType::DateTime => coerce_datetime(value).map(SqlValue::from).ok_or_else(fail),
        }
    }

    /// 转换为缓存中的 JSON 表示（与实体 serde 序列化格式一致）
    pub fn to_json(self, value: &SqlValue) -> Result<JsonValue, CoercionError> {
        let normalized = self.coerce(value)?;
        Ok(match (self, normalized) {
            (_, SqlValue::Null) => JsonValue::Null,
            (FieldType::Bool, SqlValue::Integer(i)) => JsonValue::Bool(i != 0),
            (_, SqlValue::Integer(i)) => JsonValue::from(i),
            (_, SqlValue::Real(f)) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .ok_or_else(|| CoercionError::new(self, value))?,
            (_, SqlValue::Text(s)) => JsonValue::String(s),
            (_, SqlValue::Blob(b)) => JsonValue::from(b),
        })
    }
}

fn coerce_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Integer(i) => Some(*i != 0),
        SqlValue::Real(f) => Some(*f != 0.0),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_datetime(value: &SqlValue) -> Option<DateTime<Utc>> {
    match value {
        SqlValue::Integer(secs) => Utc.timestamp_opt(*secs, 0).single(),
        SqlValue::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            // SQLite CURRENT_TIMESTAMP 格式
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Copy)]
    enum PetMood {
        Calm = 0,
        Hungry = 2,
    }

    impl SqlEnum for PetMood {
        fn to_sql_int(self) -> i64 {
            self as i64
        }
    }

    #[test]
    fn test_bind_coercion_rules() {
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
        assert_eq!(SqlValue::from(false), SqlValue::Integer(0));
        assert_eq!(SqlValue::from_enum(PetMood::Hungry), SqlValue::Integer(2));
        assert_eq!(SqlValue::from_enum(PetMood::Calm), SqlValue::Integer(0));
        assert_eq!(SqlValue::from(vec![1u8, 2]), SqlValue::Blob(vec![1, 2]));
        // 空字符串不会变成 NULL
        assert_eq!(SqlValue::from(""), SqlValue::Text(String::new()));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
    }

    #[test]
    fn test_column_map_preserves_order() {
        let map = ColumnMap::new()
            .with("UserId", 42i64)
            .with("Balance", 1000i64)
            .with("UpdatedAt", ColumnValue::Now);
        let columns: Vec<&str> = map.columns().collect();
        assert_eq!(columns, vec!["UserId", "Balance", "UpdatedAt"]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_key_fragment() {
        assert_eq!(SqlValue::Integer(42).key_fragment(), "42");
        assert_eq!(SqlValue::Text("abc".into()).key_fragment(), "abc");
        assert_eq!(SqlValue::Blob(vec![0xab, 0x01]).key_fragment(), "ab01");
    }

    #[test]
    fn test_coerce_integer() {
        let ty = FieldType::Integer;
        assert_eq!(ty.coerce(&SqlValue::Text(" 12 ".into())), Ok(SqlValue::Integer(12)));
        assert_eq!(ty.coerce(&SqlValue::Real(3.0)), Ok(SqlValue::Integer(3)));
        assert!(ty.coerce(&SqlValue::Real(3.5)).is_err());
        assert!(ty.coerce(&SqlValue::Text("abc".into())).is_err());
        assert_eq!(ty.coerce(&SqlValue::Null), Ok(SqlValue::Null));
    }

    #[test]
    fn test_coerce_bool_to_json() {
        let ty = FieldType::Bool;
        assert_eq!(ty.to_json(&SqlValue::Integer(1)).unwrap(), json!(true));
        assert_eq!(ty.to_json(&SqlValue::Text("false".into())).unwrap(), json!(false));
        assert!(ty.to_json(&SqlValue::Text("maybe".into())).is_err());
    }

    #[test]
    fn test_coerce_datetime() {
        let ty = FieldType::DateTime;
        let from_sqlite = ty.to_json(&SqlValue::Text("2024-05-01 08:30:00".into())).unwrap();
        assert_eq!(from_sqlite, json!("2024-05-01T08:30:00.000Z"));

        let from_rfc = ty
            .to_json(&SqlValue::Text("2024-05-01T16:30:00+08:00".into()))
            .unwrap();
        assert_eq!(from_rfc, json!("2024-05-01T08:30:00.000Z"));

        assert!(ty.coerce(&SqlValue::Text("yesterday".into())).is_err());
    }

    #[test]
    fn test_coerce_real_and_text() {
        assert_eq!(
            FieldType::Real.to_json(&SqlValue::Integer(2)).unwrap(),
            json!(2.0)
        );
        assert_eq!(
            FieldType::Text.to_json(&SqlValue::Integer(7)).unwrap(),
            json!("7")
        );
        assert_eq!(
            FieldType::Blob.to_json(&SqlValue::Blob(vec![1, 2])).unwrap(),
            json!([1, 2])
        );
    }
}
