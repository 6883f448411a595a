//! 测试夹具：内存 SQLite + 内存缓存 + 账户表结构

use crate::data::cache::{CacheBackend, MemoryCache};
use crate::data::record_cache::RecordCache;
use crate::data::sql::SqlStatement;
use crate::data::store::{Executor, SqliteStore};
use crate::data::value::SqlValue;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SCHEMA: &str = "
    CREATE TABLE user_wallet (
        UserId INTEGER PRIMARY KEY,
        Balance INTEGER NOT NULL DEFAULT 0,
        Points INTEGER NOT NULL DEFAULT 0,
        UpdatedAt TEXT
    );
    CREATE TABLE group_member (
        GroupId INTEGER NOT NULL,
        UserId INTEGER NOT NULL,
        Nickname TEXT NOT NULL DEFAULT '',
        Credit INTEGER NOT NULL DEFAULT 0,
        JoinedAt TEXT,
        PRIMARY KEY (GroupId, UserId)
    );
    CREATE TABLE ChangeQueue (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        TableName TEXT NOT NULL,
        RecordId TEXT NOT NULL,
        RecordId2 TEXT,
        FieldName TEXT NOT NULL,
        NewValue TEXT,
        IsProcessed INTEGER NOT NULL DEFAULT 0
    );
";

pub struct Fixture {
    pub store: Arc<SqliteStore>,
    pub cache: Arc<MemoryCache>,
    pub records: Arc<RecordCache>,
}

pub fn test_store() -> Arc<SqliteStore> {
    let store = SqliteStore::in_memory().unwrap();
    store.execute_raw(TEST_SCHEMA).unwrap();
    Arc::new(store)
}

pub fn fixture() -> Fixture {
    let store = test_store();
    let cache = Arc::new(MemoryCache::new(1000, Duration::from_secs(300)));
    let records = Arc::new(RecordCache::new(store.clone(), cache.clone()));
    Fixture {
        store,
        cache,
        records,
    }
}

pub fn fixture_with_cache(cache: Arc<dyn CacheBackend>) -> (Arc<SqliteStore>, RecordCache) {
    let store = test_store();
    let records = RecordCache::new(store.clone(), cache);
    (store, records)
}

pub fn seed_wallet(store: &SqliteStore, user_id: i64, balance: i64) {
    store
        .execute(
            &SqlStatement::new("INSERT INTO user_wallet (UserId, Balance) VALUES (@id, @balance)")
                .bind("@id", user_id)
                .bind("@balance", balance),
        )
        .unwrap();
}

pub fn seed_member(store: &SqliteStore, group_id: i64, user_id: i64, credit: i64) {
    store
        .execute(
            &SqlStatement::new(
                "INSERT INTO group_member (GroupId, UserId, Credit) VALUES (@group, @user, @credit)",
            )
            .bind("@group", group_id)
            .bind("@user", user_id)
            .bind("@credit", credit),
        )
        .unwrap();
}

pub fn store_balance(store: &SqliteStore, user_id: i64) -> i64 {
    let value = store
        .scalar(
            &SqlStatement::new("SELECT Balance FROM user_wallet WHERE UserId = @id")
                .bind("@id", user_id),
        )
        .unwrap();
    match value {
        Some(SqlValue::Integer(balance)) => balance,
        other => panic!("unexpected balance: {:?}", other),
    }
}

/// 模拟外部写入者：直接改库并写入变更队列
pub fn external_write(store: &SqliteStore, sql: &str, table: &str, id: &str, id2: Option<&str>, field: &str, new_value: &str) {
    store.execute(&SqlStatement::new(sql)).unwrap();
    store
        .execute(
            &SqlStatement::new(
                "INSERT INTO ChangeQueue (TableName, RecordId, RecordId2, FieldName, NewValue) \
                 VALUES (@table, @id, @id2, @field, @value)",
            )
            .bind("@table", table)
            .bind("@id", id)
            .bind("@id2", id2)
            .bind("@field", field)
            .bind("@value", new_value),
        )
        .unwrap();
}
