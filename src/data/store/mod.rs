//! 存储桥
//!
//! 执行参数化语句并返回行、标量或受影响行数，支持闭包作用域的事务：
//! 闭包返回 `Ok` 时提交，返回 `Err` 时回滚。超时与重试属于具体实现，本层不重试。

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::data::sql::{Dialect, SqlStatement};
use crate::data::value::SqlValue;
use crate::data::Result;

/// 查询结果行
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// 按列名取值（不区分大小写）
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    /// 第一列的值
    pub fn first(&self) -> Option<&SqlValue> {
        self.values.first()
    }
}

/// 语句执行器（连接或事务）
pub trait Executor {
    /// 执行返回行的语句（SELECT 以及带 RETURNING/OUTPUT 的写语句）
    fn query(&self, stmt: &SqlStatement) -> Result<Vec<Row>>;

    /// 执行写语句，返回受影响行数
    fn execute(&self, stmt: &SqlStatement) -> Result<usize>;

    /// 第一行第一列，没有行时返回 `None`
    fn scalar(&self, stmt: &SqlStatement) -> Result<Option<SqlValue>> {
        Ok(self
            .query(stmt)?
            .into_iter()
            .next()
            .and_then(|row| row.values.into_iter().next()))
    }
}

/// 存储桥
///
/// 事务闭包内只能使用传入的执行器；在闭包中再次调用存储桥本身会等待同一把连接锁。
pub trait StoreBridge: Executor + Send + Sync {
    /// 生成语句时使用的方言
    fn dialect(&self) -> Dialect;

    /// 在单个事务内执行 `work`
    fn transaction(&self, work: &mut dyn FnMut(&dyn Executor) -> Result<()>) -> Result<()>;
}

/// 在事务内执行一次性闭包并取回结果
pub fn in_transaction<T, F>(store: &dyn StoreBridge, work: F) -> Result<T>
where
    F: FnOnce(&dyn Executor) -> Result<T>,
{
    let mut work = Some(work);
    let mut output = None;

    store.transaction(&mut |executor| {
        if let Some(work) = work.take() {
            output = Some(work(executor)?);
        }
        Ok(())
    })?;

    output.ok_or_else(|| crate::data::DataError::Store("事务闭包未执行".to_string()))
}
