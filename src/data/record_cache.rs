//! 记录缓存协调器
//!
//! 把实体描述、SQL 构建、存储桥与缓存后端组合成：
//! - 读穿透：命中返回缓存，未命中查询存储并按 TTL 回填
//! - 写后失效：写成功后移除整条记录缓存（连同字段缓存）
//! - 写后字段同步：只更新缓存记录中的单个字段并重新按 TTL 写入
//!
//! 所有缓存变更都发生在存储写入成功（事务提交）之后。协调器本身不对缓存键加锁：
//! 并发未命中各自加载（需要合并加载的调用方使用 `CacheBackend::get_or_add`），
//! 字段同步只改写缓存条目中的字段并保留其到期时间，TTL 兜底任何残留偏差。

use crate::data::batch::{SqlTask, TaskBatch};
use crate::data::cache::{CacheBackend, CacheStats};
use crate::data::entity::{descriptor, Entity, EntityDescriptor, FieldDef, RecordKey};
use crate::data::sql::{
    build_exists, build_increment, build_insert, build_select, build_update, Criteria, Dialect,
    SelectQuery, SqlStatement,
};
use crate::data::store::{in_transaction, Executor, StoreBridge};
use crate::data::value::{ColumnMap, SqlValue};
use crate::data::{DataError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// 重新同步时存储值仍在变化的最大重读次数，超过后改为失效
const RESYNC_ATTEMPTS: usize = 3;

/// 单次写入后的缓存处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteSync {
    /// 移除整条记录缓存
    #[default]
    Invalidate,
    /// 用写入的值更新缓存中的该字段
    SyncField,
}

/// 记录缓存协调器
pub struct RecordCache {
    store: Arc<dyn StoreBridge>,
    cache: Arc<dyn CacheBackend>,
}

impl RecordCache {
    pub fn new(store: Arc<dyn StoreBridge>, cache: Arc<dyn CacheBackend>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn StoreBridge> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn dialect(&self) -> Dialect {
        self.store.dialect()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// 新建事务批次
    pub fn batch(&self) -> TaskBatch<'_> {
        TaskBatch::new(self)
    }

    // ------------------------------------------------------------------
    // 读
    // ------------------------------------------------------------------

    /// 按主键读取（读穿透，使用实体默认 TTL）
    pub fn get_by_key<E: Entity>(&self, key: impl Into<RecordKey>) -> Result<Option<E>> {
        let desc = descriptor::<E>()?;
        let ttl = desc.cache_ttl();
        self.read_through(&desc, key.into(), ttl)
    }

    /// 按主键读取，回填时使用指定 TTL
    pub fn get_by_key_with_ttl<E: Entity>(
        &self,
        key: impl Into<RecordKey>,
        ttl: Duration,
    ) -> Result<Option<E>> {
        let desc = descriptor::<E>()?;
        self.read_through(&desc, key.into(), ttl)
    }

    fn read_through<E: Entity>(
        &self,
        desc: &EntityDescriptor,
        key: RecordKey,
        ttl: Duration,
    ) -> Result<Option<E>> {
        let key = desc.normalize_key(&key)?;
        let cache_key = desc.record_cache_key(&key);

        if let Some(cached) = self.cache.get(&cache_key) {
            match serde_json::from_value::<E>(cached) {
                Ok(entity) => return Ok(Some(entity)),
                Err(e) => {
                    tracing::warn!(
                        cache_key = %cache_key,
                        error = %e,
                        "缓存记录无法反序列化，重新加载"
                    );
                    self.cache.remove(&cache_key);
                }
            }
        }

        tracing::debug!(table = desc.qualified_table(), key = %key, "缓存未命中，从存储加载");

        match self.load_record(desc, &key, self.store.as_ref())? {
            Some(record) => {
                self.cache.set(&cache_key, record.clone(), ttl);
                Ok(Some(serde_json::from_value(record)?))
            }
            None => Ok(None),
        }
    }

    /// 按主键读取，总是查询存储，不读也不写缓存
    pub fn get_by_key_no_cache<E: Entity>(&self, key: impl Into<RecordKey>) -> Result<Option<E>> {
        let desc = descriptor::<E>()?;
        let key = desc.normalize_key(&key.into())?;
        self.load_record(&desc, &key, self.store.as_ref())?
            .map(serde_json::from_value)
            .transpose()
            .map_err(DataError::from)
    }

    /// 读取单个字段（字段粒度的读穿透）
    ///
    /// 记录不存在或字段为 NULL 时返回 `default`。
    pub fn get_field<E: Entity, T: DeserializeOwned>(
        &self,
        field: &str,
        key: impl Into<RecordKey>,
        default: T,
    ) -> Result<T> {
        let desc = descriptor::<E>()?;
        let field = desc.field(field)?;
        let key = desc.normalize_key(&key.into())?;
        let field_key = desc.field_cache_key(&key, field.name);

        let value = match self.cache.get(&field_key) {
            Some(cached) => cached,
            None => match self.read_field(&desc, &key, field, self.store.as_ref())? {
                Some(value) => {
                    let json = field.ty.to_json(&value)?;
                    self.cache.set(&field_key, json.clone(), desc.cache_ttl());
                    json
                }
                None => return Ok(default),
            },
        };

        if value.is_null() {
            return Ok(default);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// 主键对应的记录是否存在
    pub fn exists<E: Entity>(&self, key: impl Into<RecordKey>) -> Result<bool> {
        let desc = descriptor::<E>()?;
        let key = desc.normalize_key(&key.into())?;
        let stmt = build_exists(
            self.dialect(),
            desc.table(),
            &Criteria::Keys(desc.key_criteria(&key)),
        )?;
        Ok(self
            .store
            .scalar(&stmt)?
            .and_then(|v| v.as_i64())
            .map(|v| v != 0)
            .unwrap_or(false))
    }

    /// 条件查询（不经过缓存）；列固定为实体声明的全部字段
    pub fn find<E: Entity>(&self, query: SelectQuery) -> Result<Vec<E>> {
        let desc = descriptor::<E>()?;
        let query = query.columns(desc.field_names());
        let stmt = build_select(self.dialect(), desc.table(), &query)?;

        self.store
            .query(&stmt)?
            .iter()
            .map(|row| -> Result<E> { Ok(serde_json::from_value(desc.row_to_json(row)?)?) })
            .collect()
    }

    // ------------------------------------------------------------------
    // 写
    // ------------------------------------------------------------------

    /// 设置单个字段，成功后按 `sync` 失效或同步缓存；返回受影响行数
    pub fn set_value<E: Entity>(
        &self,
        field: &str,
        value: impl Into<SqlValue>,
        key: impl Into<RecordKey>,
        sync: WriteSync,
    ) -> Result<usize> {
        let task = SqlTask::set_value::<E>(self.dialect(), field, value, key)?;
        let task = match sync {
            WriteSync::SyncField => task,
            WriteSync::Invalidate => task.invalidate(),
        };
        self.run_single(task)
    }

    /// 按列值映射更新记录，成功后失效缓存；返回受影响行数
    pub fn update<E: Entity>(&self, set_values: ColumnMap, key: impl Into<RecordKey>) -> Result<usize> {
        let task = SqlTask::update::<E>(self.dialect(), set_values, key)?;
        self.run_single(task)
    }

    /// 字段自增
    ///
    /// 自增与读回在同一事务内完成，提交后从存储重新读取该字段写入缓存，
    /// 缓存中不会出现客户端计算的值。记录不存在时返回 `None`。
    /// 增量类型与字段不匹配（整数字段配小数增量）时在写入前拒绝。
    pub fn plus<E: Entity>(
        &self,
        field: &str,
        delta: impl Into<SqlValue>,
        key: impl Into<RecordKey>,
    ) -> Result<Option<SqlValue>> {
        let desc = descriptor::<E>()?;
        let delta = delta.into();
        let field = desc.increment_field(field, &delta)?;
        let key = desc.normalize_key(&key.into())?;

        let increment = build_increment(
            self.dialect(),
            desc.table(),
            field.name,
            delta,
            &desc.key_criteria(&key),
        )?;
        let read_back = self.field_statement(&desc, &key, field)?;

        let updated = in_transaction(self.store.as_ref(), |tx| {
            if tx.execute(&increment)? == 0 {
                return Ok(None);
            }
            Ok(tx
                .query(&read_back)?
                .into_iter()
                .next()
                .and_then(|row| row.first().cloned()))
        })?;

        let Some(raw) = updated else {
            self.invalidate_record(&desc, &key);
            return Ok(None);
        };
        self.resync_field_value(&desc, &key, field);

        // 已提交，读回值转换失败只记录日志，不能再向调用方报告失败
        match field.ty.coerce(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    table = desc.qualified_table(),
                    key = %key,
                    field = field.name,
                    error = %e,
                    "自增已提交，读回值与字段类型不符"
                );
                self.invalidate_record(&desc, &key);
                Ok(Some(raw))
            }
        }
    }

    /// 插入记录，返回存储端实际写入的记录（含自增 id、默认时间等）
    pub fn insert<E: Entity>(&self, entity: &E) -> Result<E> {
        let desc = descriptor::<E>()?;
        let output = desc.field_names();
        let stmt = build_insert(
            self.dialect(),
            desc.table(),
            &entity.column_values(),
            &output,
            desc.generated(),
        )?;

        let row = self
            .store
            .query(&stmt)?
            .into_iter()
            .next()
            .ok_or_else(|| DataError::Store(format!("INSERT {} 未返回写入的行", desc.table())))?;

        let record = desc.row_to_json(&row)?;
        if let Some(key) = desc.key_from_row(&row) {
            let key = desc.normalize_key(&key)?;
            self.invalidate_record(&desc, &key);
        }
        Ok(serde_json::from_value(record)?)
    }

    /// 删除记录，成功后失效缓存；返回受影响行数
    pub fn delete<E: Entity>(&self, key: impl Into<RecordKey>) -> Result<usize> {
        let task = SqlTask::delete::<E>(self.dialect(), key)?;
        self.run_single(task)
    }

    /// 加锁读-改-写
    ///
    /// 在一个存储事务内锁定读取记录、调用 `modify`、写回，提交后失效缓存。
    /// `modify` 返回错误时整个事务回滚。记录不存在时返回 `None`。
    pub fn modify_locked<E, F>(&self, key: impl Into<RecordKey>, modify: F) -> Result<Option<E>>
    where
        E: Entity,
        F: FnOnce(&mut E) -> Result<()>,
    {
        let desc = descriptor::<E>()?;
        let key = desc.normalize_key(&key.into())?;
        let dialect = self.dialect();
        let criteria = desc.key_criteria(&key);
        let locked_read = build_select(
            dialect,
            desc.table(),
            &self.record_query(&desc, &key).for_update(),
        )?;
        let read_back = build_select(dialect, desc.table(), &self.record_query(&desc, &key))?;

        let modified = in_transaction(self.store.as_ref(), |tx| {
            let row = match tx.query(&locked_read)?.into_iter().next() {
                Some(row) => row,
                None => return Ok(None),
            };
            let mut entity: E = serde_json::from_value(desc.row_to_json(&row)?)?;
            modify(&mut entity)?;

            let mut columns = entity.column_values();
            for column in desc.key_fields().iter().chain(desc.generated()) {
                columns.remove(column);
            }
            tx.execute(&build_update(dialect, desc.table(), &columns, &criteria)?)?;

            match tx.query(&read_back)?.into_iter().next() {
                Some(row) => Ok(Some(serde_json::from_value(desc.row_to_json(&row)?)?)),
                None => Ok(None),
            }
        })?;

        self.invalidate_record(&desc, &key);
        Ok(modified)
    }

    fn run_single(&self, task: SqlTask) -> Result<usize> {
        let affected = self.batch().with(task).execute()?;
        Ok(affected.into_iter().sum())
    }

    // ------------------------------------------------------------------
    // 缓存维护入口（批次与变更队列使用）
    // ------------------------------------------------------------------

    /// 失效整条记录缓存（含所有字段缓存）
    pub fn invalidate<E: Entity>(&self, key: impl Into<RecordKey>) -> Result<()> {
        let desc = descriptor::<E>()?;
        let key = desc.normalize_key(&key.into())?;
        self.invalidate_record(&desc, &key);
        Ok(())
    }

    /// 用给定值同步缓存中的单个字段
    pub fn sync_field<E: Entity>(
        &self,
        key: impl Into<RecordKey>,
        field: &str,
        value: impl Into<SqlValue>,
    ) -> Result<()> {
        let desc = descriptor::<E>()?;
        let field = desc.field(field)?;
        let key = desc.normalize_key(&key.into())?;
        self.sync_field_value(&desc, &key, field, &value.into());
        Ok(())
    }

    /// 从存储重新读取单个字段并同步到缓存
    pub fn resync_field<E: Entity>(&self, key: impl Into<RecordKey>, field: &str) -> Result<()> {
        let desc = descriptor::<E>()?;
        let field = desc.field(field)?;
        let key = desc.normalize_key(&key.into())?;
        self.resync_field_value(&desc, &key, field);
        Ok(())
    }

    pub(crate) fn invalidate_record(&self, desc: &EntityDescriptor, key: &RecordKey) {
        self.cache.remove(&desc.record_cache_key(key));
        for field in desc.fields() {
            self.cache.remove(&desc.field_cache_key(key, field.name));
        }
        tracing::trace!(table = desc.qualified_table(), key = %key, "缓存已失效");
    }

    /// 字段同步；值无法转换为字段类型时放弃同步并失效整条记录
    pub(crate) fn sync_field_value(
        &self,
        desc: &EntityDescriptor,
        key: &RecordKey,
        field: &FieldDef,
        value: &SqlValue,
    ) {
        if !self.cache.is_enabled() {
            return;
        }

        match field.ty.to_json(value) {
            Ok(json) => self.write_field(desc, key, field, json),
            Err(e) => {
                tracing::warn!(
                    table = desc.qualified_table(),
                    key = %key,
                    field = field.name,
                    error = %e,
                    "字段同步放弃，失效整条记录"
                );
                self.invalidate_record(desc, key);
            }
        }
    }

    /// 重新同步：以存储中的当前值为准
    ///
    /// 写入缓存后再读一次存储，期间被并发写入改变则用新值重写，
    /// 最后一次写缓存总能看到所有已提交的写入。
    pub(crate) fn resync_field_value(&self, desc: &EntityDescriptor, key: &RecordKey, field: &FieldDef) {
        if !self.cache.is_enabled() {
            return;
        }

        let mut written: Option<JsonValue> = None;
        for _ in 0..=RESYNC_ATTEMPTS {
            let current = self
                .read_field(desc, key, field, self.store.as_ref())
                .and_then(|value| match value {
                    Some(value) => Ok(Some(field.ty.to_json(&value)?)),
                    None => Ok(None),
                });

            match current {
                Ok(Some(json)) => {
                    if written.as_ref() == Some(&json) {
                        return;
                    }
                    self.write_field(desc, key, field, json.clone());
                    written = Some(json);
                }
                Ok(None) => {
                    tracing::debug!(
                        table = desc.qualified_table(),
                        key = %key,
                        "记录已不存在，失效缓存"
                    );
                    self.invalidate_record(desc, key);
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        table = desc.qualified_table(),
                        key = %key,
                        field = field.name,
                        error = %e,
                        "重新同步字段失败，失效整条记录"
                    );
                    self.invalidate_record(desc, key);
                    return;
                }
            }
        }

        tracing::debug!(
            table = desc.qualified_table(),
            key = %key,
            field = field.name,
            "字段持续变化，失效整条记录"
        );
        self.invalidate_record(desc, key);
    }

    // ------------------------------------------------------------------
    // 内部
    // ------------------------------------------------------------------

    // 整条记录缓存只改写该字段并保留原到期时间；字段缓存写入最新值
    fn write_field(&self, desc: &EntityDescriptor, key: &RecordKey, field: &FieldDef, json: JsonValue) {
        self.cache
            .set_field(&desc.record_cache_key(key), field.name, json.clone());
        self.cache
            .set(&desc.field_cache_key(key, field.name), json, desc.cache_ttl());

        tracing::trace!(
            table = desc.qualified_table(),
            key = %key,
            field = field.name,
            "字段缓存已同步"
        );
    }

    fn record_query(&self, desc: &EntityDescriptor, key: &RecordKey) -> SelectQuery {
        SelectQuery::new()
            .columns(desc.field_names())
            .keys(desc.key_criteria(key))
    }

    fn field_statement(
        &self,
        desc: &EntityDescriptor,
        key: &RecordKey,
        field: &FieldDef,
    ) -> Result<SqlStatement> {
        let query = SelectQuery::new()
            .columns([field.name])
            .keys(desc.key_criteria(key));
        build_select(self.dialect(), desc.table(), &query)
    }

    fn load_record<X: Executor + ?Sized>(
        &self,
        desc: &EntityDescriptor,
        key: &RecordKey,
        executor: &X,
    ) -> Result<Option<JsonValue>> {
        let stmt = build_select(self.dialect(), desc.table(), &self.record_query(desc, key))?;
        match executor.query(&stmt)?.into_iter().next() {
            Some(row) => Ok(Some(desc.row_to_json(&row)?)),
            None => Ok(None),
        }
    }

    /// 读取单个字段；记录不存在时返回 `None`，字段为 NULL 时返回 `Some(Null)`
    fn read_field<X: Executor + ?Sized>(
        &self,
        desc: &EntityDescriptor,
        key: &RecordKey,
        field: &FieldDef,
        executor: &X,
    ) -> Result<Option<SqlValue>> {
        let stmt = self.field_statement(desc, key, field)?;
        Ok(executor
            .query(&stmt)?
            .into_iter()
            .next()
            .map(|row| row.first().cloned().unwrap_or(SqlValue::Null)))
    }
}
