//! 实体描述与全局注册表
//!
//! 每个记录类型通过实现 `Entity` 声明自己的表名、主键字段（1~2 个，顺序即身份）、
//! 默认缓存 TTL 以及显式字段列表。描述在首次使用时校验并写入进程级注册表，
//! 此后在进程生命周期内不再变化。

use crate::data::sql::{validate_ident, TableName};
use crate::data::store::Row;
use crate::data::value::{ColumnMap, FieldType, SqlValue};
use crate::data::{DataError, Result};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// 缓存键前缀
const CACHE_KEY_PREFIX: &str = "MetaData";

/// 全局实体描述注册表
static DESCRIPTORS: Lazy<RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// 字段声明
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
}

impl FieldDef {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty }
    }
}

/// 记录类型
///
/// 字段名即列名，实体的 serde 序列化字段名需与之一致（通常使用
/// `#[serde(rename_all = "PascalCase")]`）。
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 架构名（可选）
    const SCHEMA: Option<&'static str> = None;
    /// 表名
    const TABLE: &'static str;
    /// 主键字段，顺序有意义
    const KEYS: &'static [&'static str];
    /// 默认缓存 TTL
    const CACHE_TTL: Duration = Duration::from_secs(300);
    /// 全部字段
    const FIELDS: &'static [FieldDef];
    /// 由存储端生成、插入时排除的列（自增 id 等）
    const GENERATED: &'static [&'static str] = &[];

    /// 当前值的列映射
    fn column_values(&self) -> ColumnMap;
}

/// 实体描述
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    type_name: &'static str,
    table: TableName,
    qualified_table: String,
    key_fields: Vec<&'static str>,
    fields: &'static [FieldDef],
    generated: &'static [&'static str],
    cache_ttl: Duration,
}

impl EntityDescriptor {
    /// 从实体声明构造描述（未注册）
    pub fn of<E: Entity>() -> Result<Self> {
        Self::build(
            std::any::type_name::<E>(),
            E::SCHEMA,
            E::TABLE,
            E::KEYS,
            E::FIELDS,
            E::GENERATED,
            E::CACHE_TTL,
        )
    }

    fn build(
        type_name: &'static str,
        schema: Option<&'static str>,
        table: &'static str,
        keys: &'static [&'static str],
        fields: &'static [FieldDef],
        generated: &'static [&'static str],
        cache_ttl: Duration,
    ) -> Result<Self> {
        let table = TableName::new(schema, table)?;

        if keys.is_empty() {
            return Err(DataError::config(format!(
                "实体 {} 未声明主键字段",
                table
            )));
        }
        if keys.len() > 2 {
            return Err(DataError::config(format!(
                "实体 {} 最多支持两个主键字段，实际声明了 {} 个",
                table,
                keys.len()
            )));
        }
        for field in fields {
            validate_ident(field.name)?;
        }
        for key in keys.iter().chain(generated) {
            if !fields.iter().any(|f| f.name == *key) {
                return Err(DataError::unknown_field(table.to_string(), *key));
            }
        }

        Ok(Self {
            type_name,
            qualified_table: table.to_string(),
            table,
            key_fields: keys.to_vec(),
            fields,
            generated,
            cache_ttl,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn qualified_table(&self) -> &str {
        &self.qualified_table
    }

    pub fn key_fields(&self) -> &[&'static str] {
        &self.key_fields
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    pub fn generated(&self) -> &'static [&'static str] {
        self.generated
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// 查找字段声明
    pub fn field(&self, name: &str) -> Result<&'static FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| DataError::unknown_field(&self.qualified_table, name))
    }

    /// 查找可写字段（主键字段是记录身份，不允许通过更新修改）
    pub fn writable_field(&self, name: &str) -> Result<&'static FieldDef> {
        let field = self.field(name)?;
        if self.key_fields.contains(&field.name) {
            return Err(DataError::config(format!(
                "实体 {} 的主键字段 {} 不可修改",
                self.qualified_table, field.name
            )));
        }
        Ok(field)
    }

    /// 查找可自增的数值字段
    pub fn numeric_field(&self, name: &str) -> Result<&'static FieldDef> {
        let field = self.writable_field(name)?;
        match field.ty {
            FieldType::Integer | FieldType::Real => Ok(field),
            other => Err(DataError::config(format!(
                "实体 {} 的字段 {} 类型为 {:?}，不支持自增",
                self.qualified_table, field.name, other
            ))),
        }
    }

    /// 查找可自增字段并校验增量类型：整数字段只接受整数增量，小数字段两者皆可
    pub fn increment_field(&self, name: &str, delta: &SqlValue) -> Result<&'static FieldDef> {
        let field = self.numeric_field(name)?;
        match (field.ty, delta) {
            (FieldType::Integer, SqlValue::Integer(_))
            | (FieldType::Real, SqlValue::Integer(_) | SqlValue::Real(_)) => Ok(field),
            (ty, delta) => Err(DataError::config(format!(
                "实体 {} 的字段 {} 类型为 {:?}，不接受增量 {:?}",
                self.qualified_table, field.name, ty, delta
            ))),
        }
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    /// 校验主键个数并按主键字段类型规范化
    pub fn normalize_key(&self, key: &RecordKey) -> Result<RecordKey> {
        if key.parts.len() != self.key_fields.len() {
            return Err(DataError::config(format!(
                "实体 {} 需要 {} 个主键值，实际提供了 {} 个",
                self.qualified_table,
                self.key_fields.len(),
                key.parts.len()
            )));
        }
        let parts = self
            .key_fields
            .iter()
            .zip(&key.parts)
            .map(|(name, value)| Ok(self.field(name)?.ty.coerce(value)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordKey { parts })
    }

    /// 主键条件（列名, 值），顺序与声明一致
    pub fn key_criteria(&self, key: &RecordKey) -> Vec<(String, SqlValue)> {
        self.key_fields
            .iter()
            .zip(&key.parts)
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    /// 整条记录的缓存键：`MetaData:<QualifiedTable>:Id:<k1>[_<k2>]`
    pub fn record_cache_key(&self, key: &RecordKey) -> String {
        format!(
            "{}:{}:Id:{}",
            CACHE_KEY_PREFIX, self.qualified_table, key
        )
    }

    /// 单字段缓存键：`MetaData:<QualifiedTable>:Id:<k1>[_<k2>]:Field:<FieldName>`
    pub fn field_cache_key(&self, key: &RecordKey, field: &str) -> String {
        format!("{}:Field:{}", self.record_cache_key(key), field)
    }

    /// 将查询行转换为缓存/反序列化使用的 JSON 对象
    pub fn row_to_json(&self, row: &Row) -> Result<JsonValue> {
        let mut object = Map::with_capacity(self.fields.len());
        for field in self.fields {
            let value = match row.get(field.name) {
                Some(value) => field.ty.to_json(value)?,
                None => JsonValue::Null,
            };
            object.insert(field.name.to_string(), value);
        }
        Ok(JsonValue::Object(object))
    }

    /// 从查询行中取出主键
    pub fn key_from_row(&self, row: &Row) -> Option<RecordKey> {
        let parts = self
            .key_fields
            .iter()
            .map(|name| row.get(name).filter(|v| !v.is_null()).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(RecordKey { parts })
    }
}

/// 获取实体描述（首次调用时校验并注册）
pub fn descriptor<E: Entity>() -> Result<Arc<EntityDescriptor>> {
    let type_id = TypeId::of::<E>();

    {
        let registry = DESCRIPTORS
            .read()
            .map_err(|e| DataError::Concurrency(e.to_string()))?;
        if let Some(desc) = registry.get(&type_id) {
            return Ok(Arc::clone(desc));
        }
    }

    let built = Arc::new(EntityDescriptor::of::<E>()?);

    let mut registry = DESCRIPTORS
        .write()
        .map_err(|e| DataError::Concurrency(e.to_string()))?;
    // 并发首次注册时保留先写入的描述
    let desc = registry.entry(type_id).or_insert(built);
    Ok(Arc::clone(desc))
}

/// 记录主键值（1 或 2 个，顺序即身份）
#[derive(Debug, Clone, PartialEq)]
pub struct RecordKey {
    parts: Vec<SqlValue>,
}

impl RecordKey {
    pub fn single(value: impl Into<SqlValue>) -> Self {
        Self {
            parts: vec![value.into()],
        }
    }

    pub fn pair(first: impl Into<SqlValue>, second: impl Into<SqlValue>) -> Self {
        Self {
            parts: vec![first.into(), second.into()],
        }
    }

    pub fn parts(&self) -> &[SqlValue] {
        &self.parts
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.parts.iter().map(SqlValue::key_fragment).collect();
        write!(f, "{}", rendered.join("_"))
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        Self::single(value)
    }
}

impl From<i32> for RecordKey {
    fn from(value: i32) -> Self {
        Self::single(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self::single(value)
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        Self::single(value)
    }
}

impl From<SqlValue> for RecordKey {
    fn from(value: SqlValue) -> Self {
        Self::single(value)
    }
}

impl<A: Into<SqlValue>, B: Into<SqlValue>> From<(A, B)> for RecordKey {
    fn from((first, second): (A, B)) -> Self {
        Self::pair(first, second)
    }
}
