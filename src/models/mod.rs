pub mod config;
pub mod group_member;
pub mod wallet;

pub use config::*;
pub use group_member::GroupMember;
pub use wallet::UserWallet;

use crate::data::Result;
use crate::services::change_queue::RouteTable;

/// 账户实体的变更路由（守护进程启动时注册）
pub fn account_routes() -> Result<RouteTable> {
    let mut routes = RouteTable::new();
    routes
        .register::<UserWallet>()?
        .register::<GroupMember>()?;
    Ok(routes)
}
