// 服务层模块
//
// - change_queue: 变更队列对账（外部写入后的缓存修正）

pub mod change_queue;

pub use change_queue::{ChangeQueueReconciler, ReconcileStats, ReconcilerConfig, RouteTable};
