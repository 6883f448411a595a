//! 事务任务批次
//!
//! 多条语句在一个事务内全部成功或全部回滚。每个任务显式声明提交后的缓存处理：
//! - `Invalidate`: 失效整条记录
//! - `Sync`: 用调用方给出的值同步字段
//! - `Resync`: 从存储重新读取字段后同步
//!
//! 缓存处理严格发生在提交之后、`execute` 返回之前，按任务顺序执行；
//! 事务失败时不触碰缓存。

use crate::data::entity::{descriptor, Entity, EntityDescriptor, FieldDef, RecordKey};
use crate::data::record_cache::RecordCache;
use crate::data::sql::{build_delete, build_increment, build_update, Criteria, Dialect, SqlStatement};
use crate::data::store::in_transaction;
use crate::data::value::{ColumnMap, SqlValue};
use crate::data::Result;
use std::sync::Arc;

/// 任务提交后的缓存处理
#[derive(Debug, Clone, PartialEq)]
pub enum CacheIntent {
    Invalidate,
    Sync { field: String, value: SqlValue },
    Resync { field: String },
}

/// 批次中的单条语句
#[derive(Debug, Clone)]
pub struct SqlTask {
    statement: SqlStatement,
    descriptor: Arc<EntityDescriptor>,
    key: RecordKey,
    intent: CacheIntent,
}

impl SqlTask {
    /// 任意写语句，默认提交后失效记录缓存
    ///
    /// 语句不能返回行（不要带 RETURNING/OUTPUT）。
    pub fn new<E: Entity>(statement: SqlStatement, key: impl Into<RecordKey>) -> Result<Self> {
        let descriptor = descriptor::<E>()?;
        let key = descriptor.normalize_key(&key.into())?;
        Ok(Self {
            statement,
            descriptor,
            key,
            intent: CacheIntent::Invalidate,
        })
    }

    /// 提交后用 `value` 同步字段
    pub fn sync_field(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.intent = CacheIntent::Sync {
            field: field.into(),
            value: value.into(),
        };
        self
    }

    /// 提交后从存储重新读取字段
    pub fn resync(mut self, field: impl Into<String>) -> Self {
        self.intent = CacheIntent::Resync {
            field: field.into(),
        };
        self
    }

    /// 提交后失效整条记录
    pub fn invalidate(mut self) -> Self {
        self.intent = CacheIntent::Invalidate;
        self
    }

    /// `SET field = @value`，提交后同步该字段
    pub fn set_value<E: Entity>(
        dialect: Dialect,
        field: &str,
        value: impl Into<SqlValue>,
        key: impl Into<RecordKey>,
    ) -> Result<Self> {
        let descriptor = descriptor::<E>()?;
        let field = descriptor.writable_field(field)?;
        let key = descriptor.normalize_key(&key.into())?;
        let value = value.into();

        let set = ColumnMap::new().with(field.name, value.clone());
        let statement = build_update(dialect, descriptor.table(), &set, &descriptor.key_criteria(&key))?;

        Ok(Self {
            statement,
            descriptor,
            key,
            intent: CacheIntent::Sync {
                field: field.name.to_string(),
                value,
            },
        })
    }

    /// 多列更新，提交后失效记录
    pub fn update<E: Entity>(dialect: Dialect, set_values: ColumnMap, key: impl Into<RecordKey>) -> Result<Self> {
        let descriptor = descriptor::<E>()?;
        for column in set_values.columns() {
            descriptor.writable_field(column)?;
        }
        let key = descriptor.normalize_key(&key.into())?;
        let statement = build_update(
            dialect,
            descriptor.table(),
            &set_values,
            &descriptor.key_criteria(&key),
        )?;

        Ok(Self {
            statement,
            descriptor,
            key,
            intent: CacheIntent::Invalidate,
        })
    }

    /// 字段自增，提交后从存储重新读取；增量类型不匹配字段时构建即失败
    pub fn plus<E: Entity>(
        dialect: Dialect,
        field: &str,
        delta: impl Into<SqlValue>,
        key: impl Into<RecordKey>,
    ) -> Result<Self> {
        let descriptor = descriptor::<E>()?;
        let delta = delta.into();
        let field = descriptor.increment_field(field, &delta)?;
        let key = descriptor.normalize_key(&key.into())?;
        let statement = build_increment(
            dialect,
            descriptor.table(),
            field.name,
            delta,
            &descriptor.key_criteria(&key),
        )?;

        Ok(Self {
            statement,
            descriptor,
            key,
            intent: CacheIntent::Resync {
                field: field.name.to_string(),
            },
        })
    }

    /// 按主键删除，提交后失效记录
    pub fn delete<E: Entity>(dialect: Dialect, key: impl Into<RecordKey>) -> Result<Self> {
        let descriptor = descriptor::<E>()?;
        let key = descriptor.normalize_key(&key.into())?;
        let statement = build_delete(
            dialect,
            descriptor.table(),
            &Criteria::Keys(descriptor.key_criteria(&key)),
        )?;

        Ok(Self {
            statement,
            descriptor,
            key,
            intent: CacheIntent::Invalidate,
        })
    }

    pub fn statement(&self) -> &SqlStatement {
        &self.statement
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn intent(&self) -> &CacheIntent {
        &self.intent
    }

    /// 校验缓存处理中引用的字段
    fn intent_field(&self) -> Result<Option<&'static FieldDef>> {
        match &self.intent {
            CacheIntent::Invalidate => Ok(None),
            CacheIntent::Sync { field, .. } | CacheIntent::Resync { field } => {
                self.descriptor.field(field).map(Some)
            }
        }
    }
}

/// 事务任务批次
pub struct TaskBatch<'a> {
    records: &'a RecordCache,
    tasks: Vec<SqlTask>,
}

impl<'a> TaskBatch<'a> {
    pub(crate) fn new(records: &'a RecordCache) -> Self {
        Self {
            records,
            tasks: Vec::new(),
        }
    }

    pub fn push(&mut self, task: SqlTask) -> &mut Self {
        self.tasks.push(task);
        self
    }

    pub fn with(mut self, task: SqlTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn set_value<E: Entity>(
        &mut self,
        field: &str,
        value: impl Into<SqlValue>,
        key: impl Into<RecordKey>,
    ) -> Result<&mut Self> {
        let task = SqlTask::set_value::<E>(self.records.dialect(), field, value, key)?;
        Ok(self.push(task))
    }

    pub fn update<E: Entity>(&mut self, set_values: ColumnMap, key: impl Into<RecordKey>) -> Result<&mut Self> {
        let task = SqlTask::update::<E>(self.records.dialect(), set_values, key)?;
        Ok(self.push(task))
    }

    pub fn plus<E: Entity>(
        &mut self,
        field: &str,
        delta: impl Into<SqlValue>,
        key: impl Into<RecordKey>,
    ) -> Result<&mut Self> {
        let task = SqlTask::plus::<E>(self.records.dialect(), field, delta, key)?;
        Ok(self.push(task))
    }

    pub fn delete<E: Entity>(&mut self, key: impl Into<RecordKey>) -> Result<&mut Self> {
        let task = SqlTask::delete::<E>(self.records.dialect(), key)?;
        Ok(self.push(task))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 执行批次，返回每个任务的受影响行数
    ///
    /// 字段校验在开启事务之前完成；任何语句失败都会回滚整个批次且不触碰缓存。
    pub fn execute(self) -> Result<Vec<usize>> {
        if self.tasks.is_empty() {
            return Ok(Vec::new());
        }

        let fields = self
            .tasks
            .iter()
            .map(SqlTask::intent_field)
            .collect::<Result<Vec<_>>>()?;

        let tasks = &self.tasks;
        let affected = in_transaction(self.records.store().as_ref(), |tx| {
            tasks
                .iter()
                .map(|task| tx.execute(&task.statement))
                .collect::<Result<Vec<_>>>()
        })
        .map_err(|e| {
            tracing::debug!(tasks = tasks.len(), error = %e, "批次回滚");
            e
        })?;

        for ((task, field), rows) in tasks.iter().zip(&fields).zip(&affected) {
            self.apply_intent(task, *field, *rows);
        }

        tracing::debug!(tasks = tasks.len(), "批次已提交");
        Ok(affected)
    }

    fn apply_intent(&self, task: &SqlTask, field: Option<&'static FieldDef>, rows: usize) {
        let desc = task.descriptor.as_ref();
        match (&task.intent, field) {
            // 未命中任何行时没有可同步的值
            (_, _) if rows == 0 => self.records.invalidate_record(desc, &task.key),
            (CacheIntent::Sync { value, .. }, Some(field)) => {
                self.records.sync_field_value(desc, &task.key, field, value)
            }
            (CacheIntent::Resync { .. }, Some(field)) => {
                self.records.resync_field_value(desc, &task.key, field)
            }
            _ => self.records.invalidate_record(desc, &task.key),
        }
    }
}

impl std::fmt::Debug for TaskBatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskBatch")
            .field("tasks", &self.tasks)
            .finish()
    }
}
