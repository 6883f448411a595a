// 变更队列协调器 - 修正外部写入造成的缓存偏差

use super::models::{ChangeRow, ReconcileStats, ReconcilerConfig};
use super::routes::RouteTable;
use crate::data::record_cache::RecordCache;
use crate::data::sql::{build_claim_changes, SqlStatement, TableName};
use crate::data::store::Executor;
use crate::data::{DataError, FieldDef, RecordKey, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// 变更队列协调器
///
/// 每轮用一条语句认领并删除一批未处理的变更行，再按路由表把每行交给对应实体的
/// 字段重新同步入口。行在认领时已删除，处理失败不会重试，缓存 TTL 兜底。
pub struct ChangeQueueReconciler {
    records: Arc<RecordCache>,
    routes: RouteTable,
    claim: SqlStatement,
    interval: Duration,
}

impl ChangeQueueReconciler {
    pub fn new(records: Arc<RecordCache>, routes: RouteTable, config: &ReconcilerConfig) -> Result<Self> {
        if config.interval_ms == 0 {
            return Err(DataError::config("变更队列轮询间隔必须大于 0"));
        }
        let table = TableName::parse(&config.table)?;
        let claim = build_claim_changes(records.dialect(), &table, config.batch_size)?;

        Ok(Self {
            records,
            routes,
            claim,
            interval: config.interval(),
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// 执行一轮：认领、路由、重新同步
    pub fn run_once(&self) -> Result<ReconcileStats> {
        let rows = self.records.store().query(&self.claim)?;
        let mut stats = ReconcileStats {
            claimed: rows.len(),
            ..ReconcileStats::default()
        };

        for row in &rows {
            let applied = match ChangeRow::from_row(row) {
                Some(change) => self.apply(&change),
                None => {
                    tracing::warn!(columns = ?row.columns(), "变更行缺少必需列，已丢弃");
                    false
                }
            };
            if applied {
                stats.applied += 1;
            } else {
                stats.dropped += 1;
            }
        }

        if stats.claimed > 0 {
            tracing::debug!(
                claimed = stats.claimed,
                applied = stats.applied,
                dropped = stats.dropped,
                "变更队列协调完成"
            );
        }
        Ok(stats)
    }

    /// 周期任务的一轮：协调变更队列后清理缓存中已过期的条目
    pub fn tick(&self) -> Result<ReconcileStats> {
        let stats = self.run_once();
        let purged = self.records.cache().purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "已清除过期缓存条目");
        }
        stats
    }

    /// 处理单行，返回是否已同步到缓存
    fn apply(&self, change: &ChangeRow) -> bool {
        let Some(desc) = self.routes.lookup(&change.table_name) else {
            tracing::debug!(table = %change.table_name, "变更行未映射到实体，已丢弃");
            return false;
        };

        let raw_key = match &change.record_id2 {
            Some(second) => RecordKey::pair(change.record_id.clone(), second.clone()),
            None => RecordKey::single(change.record_id.clone()),
        };
        let resolved = desc.normalize_key(&raw_key).and_then(|key| {
            let field = find_field(desc.fields(), &change.field_name, desc.qualified_table())?;
            Ok((key, field))
        });

        match resolved {
            Ok((key, field)) => {
                tracing::debug!(
                    table = desc.qualified_table(),
                    key = %key,
                    field = field.name,
                    new_value = ?change.new_value,
                    "按存储当前值重新同步字段"
                );
                self.records.resync_field_value(desc, &key, field);
                true
            }
            Err(e) => {
                tracing::warn!(
                    table = %change.table_name,
                    record_id = %change.record_id,
                    field = %change.field_name,
                    error = %e,
                    "变更行无效，已丢弃"
                );
                false
            }
        }
    }

    /// 启动周期协调任务，`shutdown` 置为 `true` 或发送端关闭时退出
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_ms = self.interval.as_millis() as u64,
                routes = self.routes.len(),
                "变更队列协调器已启动"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reconciler = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || reconciler.tick()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!(error = %e, "认领变更行失败，下一轮重试"),
                            Err(e) => tracing::error!(error = %e, "协调任务异常退出"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("变更队列协调器已停止");
        })
    }
}

// 外部写入者记录的字段名大小写不一定与声明一致
fn find_field(fields: &'static [FieldDef], name: &str, table: &str) -> Result<&'static FieldDef> {
    fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| DataError::unknown_field(table, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cache::CacheBackend;
    use crate::data::test_support::{external_write, fixture, seed_member, seed_wallet, Fixture};
    use crate::models::{account_routes, GroupMember, UserWallet};
    use serde_json::json;

    const NO_OP: &str = "UPDATE user_wallet SET Points = Points WHERE 0";

    fn reconciler(fx: &Fixture, batch_size: usize) -> ChangeQueueReconciler {
        let config = ReconcilerConfig {
            batch_size,
            interval_ms: 10,
            ..ReconcilerConfig::default()
        };
        ChangeQueueReconciler::new(Arc::clone(&fx.records), account_routes().unwrap(), &config)
            .unwrap()
    }

    fn queue_len(fx: &Fixture) -> i64 {
        fx.store
            .scalar(&SqlStatement::new("SELECT COUNT(*) FROM ChangeQueue"))
            .unwrap()
            .and_then(|v| v.as_i64())
            .unwrap()
    }

    #[test]
    fn test_external_write_reaches_cache() {
        let fx = fixture();
        seed_wallet(&fx.store, 42, 1000);
        fx.records.get_by_key::<UserWallet>(42).unwrap();

        external_write(
            &fx.store,
            "UPDATE user_wallet SET Balance = 5000 WHERE UserId = 42",
            "user_wallet",
            "42",
            None,
            "Balance",
            "5000",
        );

        let stats = reconciler(&fx, 100).run_once().unwrap();
        assert_eq!(
            stats,
            ReconcileStats {
                claimed: 1,
                applied: 1,
                dropped: 0
            }
        );
        assert_eq!(queue_len(&fx), 0);

        let cached = fx.cache.get("MetaData:user_wallet:Id:42").unwrap();
        assert_eq!(cached["Balance"], json!(5000));
        let wallet = fx.records.get_by_key::<UserWallet>(42).unwrap().unwrap();
        assert_eq!(wallet.balance, 5000);
    }

    #[test]
    fn test_cache_follows_store_not_queue_value() {
        let fx = fixture();
        seed_wallet(&fx.store, 7, 10);
        fx.records.get_by_key::<UserWallet>(7).unwrap();

        // 队列中的新值已过时，存储为准
        external_write(
            &fx.store,
            "UPDATE user_wallet SET Balance = 30 WHERE UserId = 7",
            "user_wallet",
            "7",
            None,
            "balance",
            "20",
        );
        reconciler(&fx, 100).run_once().unwrap();

        let wallet = fx.records.get_by_key::<UserWallet>(7).unwrap().unwrap();
        assert_eq!(wallet.balance, 30);
    }

    #[test]
    fn test_composite_key_row() {
        let fx = fixture();
        seed_member(&fx.store, 1001, 42, 5);
        fx.records.get_by_key::<GroupMember>((1001, 42)).unwrap();

        external_write(
            &fx.store,
            "UPDATE group_member SET Credit = 9 WHERE GroupId = 1001 AND UserId = 42",
            "group_member",
            "1001",
            Some("42"),
            "Credit",
            "9",
        );
        let stats = reconciler(&fx, 100).run_once().unwrap();
        assert_eq!(stats.applied, 1);

        let member = fx
            .records
            .get_by_key::<GroupMember>((1001, 42))
            .unwrap()
            .unwrap();
        assert_eq!(member.credit, 9);
    }

    #[test]
    fn test_unmapped_and_invalid_rows_are_dropped() {
        let fx = fixture();
        seed_wallet(&fx.store, 1, 10);

        external_write(&fx.store, NO_OP, "pet_state", "1", None, "Mood", "2");
        external_write(&fx.store, NO_OP, "user_wallet", "1", None, "Level", "3");
        external_write(&fx.store, NO_OP, "user_wallet", "abc", None, "Balance", "3");

        let stats = reconciler(&fx, 100).run_once().unwrap();
        assert_eq!(stats.claimed, 3);
        assert_eq!(stats.applied, 0);
        assert_eq!(stats.dropped, 3);
        // 认领即删除，不会重试
        assert_eq!(queue_len(&fx), 0);
    }

    #[test]
    fn test_claim_respects_batch_size() {
        let fx = fixture();
        for id in 1..=3 {
            seed_wallet(&fx.store, id, 0);
            external_write(&fx.store, NO_OP, "user_wallet", &id.to_string(), None, "Balance", "0");
        }

        let reconciler = reconciler(&fx, 2);
        assert_eq!(reconciler.run_once().unwrap().claimed, 2);
        assert_eq!(reconciler.run_once().unwrap().claimed, 1);
        assert_eq!(reconciler.run_once().unwrap(), ReconcileStats::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let fx = fixture();
        let zero_interval = ReconcilerConfig {
            interval_ms: 0,
            ..ReconcilerConfig::default()
        };
        assert!(ChangeQueueReconciler::new(fx.records.clone(), RouteTable::new(), &zero_interval)
            .err()
            .unwrap()
            .is_config());

        let bad_table = ReconcilerConfig {
            table: "Change Queue".to_string(),
            ..ReconcilerConfig::default()
        };
        assert!(ChangeQueueReconciler::new(fx.records.clone(), RouteTable::new(), &bad_table).is_err());
    }

    #[test]
    fn test_tick_purges_expired_entries() {
        let fx = fixture();
        seed_wallet(&fx.store, 1, 10);
        seed_wallet(&fx.store, 2, 20);
        fx.records
            .get_by_key_with_ttl::<UserWallet>(1, Duration::from_millis(20))
            .unwrap();
        fx.records.get_by_key::<UserWallet>(2).unwrap();

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(fx.cache.len(), 2);
        assert_eq!(reconciler(&fx, 100).tick().unwrap(), ReconcileStats::default());
        assert_eq!(fx.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_loop_applies_and_stops() {
        let fx = fixture();
        seed_wallet(&fx.store, 42, 1000);
        fx.records.get_by_key::<UserWallet>(42).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(reconciler(&fx, 100)).spawn(shutdown_rx);

        external_write(
            &fx.store,
            "UPDATE user_wallet SET Balance = 1500 WHERE UserId = 42",
            "user_wallet",
            "42",
            None,
            "Balance",
            "1500",
        );

        let mut synced = false;
        for _ in 0..100 {
            let cached = fx.cache.get("MetaData:user_wallet:Id:42").unwrap();
            if cached["Balance"] == json!(1500) {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
