//! SQLite 存储桥
//!
//! 单连接 + `Arc<Mutex>`，语句缓存由 rusqlite 的 `prepare_cached` 提供。
//! 事务使用 IMMEDIATE 模式：开始时即取得写锁，读-改-写期间不会被其他写者插入。
//!
//! # 使用示例
//!
//! ```rust
//! let store = SqliteStore::open(Path::new("bot.db"), Duration::from_secs(5))?;
//! let rows = store.query(&SqlStatement::new("SELECT * FROM user_wallet"))?;
//!
//! in_transaction(&store, |tx| {
//!     tx.execute(&update_stmt)?;
//!     tx.query(&select_stmt)
//! })?;
//! ```

use super::{Executor, Row, StoreBridge};
use crate::data::sql::{Dialect, SqlStatement};
use crate::data::value::SqlValue;
use crate::data::{DataError, Result};
use rusqlite::types::ToSql;
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// SQLite 存储桥
#[derive(Clone)]
pub struct SqliteStore {
    /// 数据库连接
    conn: Arc<Mutex<Connection>>,
    /// 数据库路径（用于错误报告）
    db_path: PathBuf,
}

impl SqliteStore {
    /// 打开（必要时创建）数据库文件
    ///
    /// # 参数
    ///
    /// - `path`: 数据库文件路径
    /// - `busy_timeout`: 等待其他连接释放锁的最长时间
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DataError::Store(format!("创建目录失败 {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        tracing::debug!(path = %path.display(), "SQLite 存储已打开");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        })
    }

    /// 内存数据库（测试使用）
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DataError::Concurrency(e.to_string()))
    }

    /// 执行原始 SQL（建表等初始化脚本）
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    /// 检查表是否存在
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 获取数据库路径
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn named_params(stmt: &SqlStatement) -> Vec<(&str, &dyn ToSql)> {
    stmt.params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

fn run_query(conn: &Connection, stmt: &SqlStatement) -> Result<Vec<Row>> {
    let mut prepared = conn.prepare_cached(&stmt.sql)?;
    let columns: Vec<String> = prepared
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let params = named_params(stmt);
    let mut rows = prepared.query(params.as_slice())?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(SqlValue::from_value_ref(row.get_ref(idx)?));
        }
        result.push(Row::new(columns.clone(), values));
    }

    tracing::trace!(sql = %stmt.sql, rows = result.len(), "查询完成");
    Ok(result)
}

fn run_execute(conn: &Connection, stmt: &SqlStatement) -> Result<usize> {
    let mut prepared = conn.prepare_cached(&stmt.sql)?;
    let params = named_params(stmt);
    let affected = prepared.execute(params.as_slice())?;

    tracing::trace!(sql = %stmt.sql, affected, "语句执行完成");
    Ok(affected)
}

impl Executor for SqliteStore {
    fn query(&self, stmt: &SqlStatement) -> Result<Vec<Row>> {
        let conn = self.lock()?;
        run_query(&conn, stmt)
    }

    fn execute(&self, stmt: &SqlStatement) -> Result<usize> {
        let conn = self.lock()?;
        run_execute(&conn, stmt)
    }
}

/// 事务内的执行器
struct TxExecutor<'a> {
    conn: &'a Connection,
}

impl Executor for TxExecutor<'_> {
    fn query(&self, stmt: &SqlStatement) -> Result<Vec<Row>> {
        run_query(self.conn, stmt)
    }

    fn execute(&self, stmt: &SqlStatement) -> Result<usize> {
        run_execute(self.conn, stmt)
    }
}

impl StoreBridge for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn transaction(&self, work: &mut dyn FnMut(&dyn Executor) -> Result<()>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // 出错时 tx 被丢弃，自动回滚
        work(&TxExecutor { conn: &tx })?;

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::in_transaction;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");
        let store = SqliteStore::open(&db_path, Duration::from_secs(1)).unwrap();

        store
            .execute_raw(
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    avatar BLOB
                )",
            )
            .unwrap();

        (temp_dir, store)
    }

    fn insert_user(id: i64, name: &str) -> SqlStatement {
        SqlStatement::new("INSERT INTO users (id, name) VALUES (@id, @name)")
            .bind("@id", id)
            .bind("@name", name)
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let (_temp_dir, store) = create_test_store();
        assert!(store.db_path().exists());
        assert!(store.table_exists("users").unwrap());
        assert!(!store.table_exists("nonexistent").unwrap());
    }

    #[test]
    fn test_execute_and_query() {
        let (_temp_dir, store) = create_test_store();

        assert_eq!(store.execute(&insert_user(1, "Alice")).unwrap(), 1);

        let rows = store
            .query(&SqlStatement::new("SELECT * FROM users WHERE id = @id").bind("@id", 1))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns(), &["id", "name", "avatar"]);
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("Alice".to_string())));
        assert_eq!(rows[0].get("avatar"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_blob_and_empty_string_round_trip() {
        let (_temp_dir, store) = create_test_store();
        store
            .execute(
                &SqlStatement::new("INSERT INTO users (id, name, avatar) VALUES (1, @name, @avatar)")
                    .bind("@name", "")
                    .bind("@avatar", vec![0u8, 1, 2]),
            )
            .unwrap();

        let rows = store.query(&SqlStatement::new("SELECT name, avatar FROM users")).unwrap();
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text(String::new())));
        assert_eq!(rows[0].get("avatar"), Some(&SqlValue::Blob(vec![0, 1, 2])));
    }

    #[test]
    fn test_scalar() {
        let (_temp_dir, store) = create_test_store();
        store.execute(&insert_user(1, "Alice")).unwrap();

        let count = store.scalar(&SqlStatement::new("SELECT COUNT(*) FROM users")).unwrap();
        assert_eq!(count, Some(SqlValue::Integer(1)));

        let missing = store
            .scalar(&SqlStatement::new("SELECT name FROM users WHERE id = 99"))
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_transaction_commit() {
        let (_temp_dir, store) = create_test_store();

        store
            .transaction(&mut |tx| {
                tx.execute(&insert_user(1, "Alice"))?;
                tx.execute(&insert_user(2, "Bob"))?;
                Ok(())
            })
            .unwrap();

        let rows = store.query(&SqlStatement::new("SELECT * FROM users")).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_transaction_rollback() {
        let (_temp_dir, store) = create_test_store();

        let result = in_transaction(&store, |tx| {
            tx.execute(&insert_user(1, "Alice"))?;
            // 故意违反主键约束
            tx.execute(&insert_user(1, "Bob"))?;
            Ok(())
        });

        assert!(matches!(result, Err(DataError::Database(_))));

        let rows = store.query(&SqlStatement::new("SELECT * FROM users")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_returning_goes_through_query() {
        let (_temp_dir, store) = create_test_store();
        let rows = store
            .query(
                &SqlStatement::new("INSERT INTO users (name) VALUES (@name) RETURNING id")
                    .bind("@name", "Carol"),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0].get("id"), Some(SqlValue::Integer(_))));
    }

    #[test]
    fn test_executor_through_trait_object() {
        let (_temp_dir, store) = create_test_store();
        let executor: &dyn Executor = &store;

        assert_eq!(executor.execute(&insert_user(7, "Eve")).unwrap(), 1);
        let rows = executor
            .query(&SqlStatement::new("SELECT name FROM users"))
            .unwrap();
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("Eve".to_string())));
        // 两次调用之间未持有连接锁
        assert!(store.table_exists("users").unwrap());
    }

    #[test]
    fn test_clone_shares_connection() {
        let store = SqliteStore::in_memory().unwrap();
        let other = store.clone();
        store
            .execute_raw("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();
        assert!(other.table_exists("t").unwrap());
    }
}
