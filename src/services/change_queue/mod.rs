//! 变更队列对账
//!
//! 外部写入者（管理后台、定时任务）直接改库时会在变更队列表中留下一行，
//! 协调器周期性认领这些行并按存储当前值修正缓存。

pub mod models;
pub mod reconciler;
pub mod routes;

pub use models::{ChangeRow, ReconcileStats, ReconcilerConfig};
pub use reconciler::ChangeQueueReconciler;
pub use routes::RouteTable;
