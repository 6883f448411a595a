// 表名 → 实体描述的静态路由表

use crate::data::{descriptor, DataError, Entity, EntityDescriptor, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// 路由表
///
/// 守护进程启动前注册完整，之后只读；协调器只在这里查找实体。
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<EntityDescriptor>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册实体，同一表名只能对应一个实体类型
    pub fn register<E: Entity>(&mut self) -> Result<&mut Self> {
        let desc = descriptor::<E>()?;
        let name = normalize(desc.qualified_table());

        if let Some(existing) = self.routes.get(&name) {
            if existing.type_name() != desc.type_name() {
                return Err(DataError::config(format!(
                    "表 {} 已注册为 {}，不能再注册为 {}",
                    desc.qualified_table(),
                    existing.type_name(),
                    desc.type_name()
                )));
            }
            return Ok(self);
        }

        tracing::debug!(table = desc.qualified_table(), entity = desc.type_name(), "注册变更路由");
        self.routes.insert(name, desc);
        Ok(self)
    }

    /// 查找表名对应的实体（不区分大小写，找不到时再去掉架构前缀重试）
    pub fn lookup(&self, table_name: &str) -> Option<&Arc<EntityDescriptor>> {
        let name = normalize(table_name);
        self.routes.get(&name).or_else(|| {
            let (_, bare) = name.rsplit_once('.')?;
            self.routes.get(bare)
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// 去掉 [] 与 "" 引用符并转为小写
fn normalize(table_name: &str) -> String {
    table_name
        .trim()
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '"'))
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ColumnMap, FieldDef, FieldType};
    use crate::models::{GroupMember, UserWallet};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct WalletShadow;

    impl Entity for WalletShadow {
        const TABLE: &'static str = "user_wallet";
        const KEYS: &'static [&'static str] = &["UserId"];
        const FIELDS: &'static [FieldDef] = &[FieldDef::new("UserId", FieldType::Integer)];

        fn column_values(&self) -> ColumnMap {
            ColumnMap::new()
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut routes = RouteTable::new();
        routes
            .register::<UserWallet>()
            .unwrap()
            .register::<GroupMember>()
            .unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(
            routes.lookup("USER_WALLET").unwrap().qualified_table(),
            "user_wallet"
        );
        assert_eq!(
            routes.lookup("[dbo].[group_member]").unwrap().qualified_table(),
            "group_member"
        );
        assert!(routes.lookup("pet_state").is_none());
    }

    #[test]
    fn test_register_same_type_twice_is_noop() {
        let mut routes = RouteTable::new();
        routes.register::<UserWallet>().unwrap();
        routes.register::<UserWallet>().unwrap();
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn test_conflicting_table_rejected() {
        let mut routes = RouteTable::new();
        routes.register::<UserWallet>().unwrap();
        assert!(routes.register::<WalletShadow>().unwrap_err().is_config());
    }
}
