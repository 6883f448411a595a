use crate::data::{ColumnMap, ColumnValue, Entity, FieldDef, FieldType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户钱包（所有插件共享的余额与积分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserWallet {
    pub user_id: i64,
    pub balance: i64,
    pub points: i64,
    /// 最近一次变更时间，未设置时由存储端填入
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for UserWallet {
    const TABLE: &'static str = "user_wallet";
    const KEYS: &'static [&'static str] = &["UserId"];
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::new("UserId", FieldType::Integer),
        FieldDef::new("Balance", FieldType::Integer),
        FieldDef::new("Points", FieldType::Integer),
        FieldDef::new("UpdatedAt", FieldType::DateTime),
    ];

    fn column_values(&self) -> ColumnMap {
        ColumnMap::new()
            .with("UserId", self.user_id)
            .with("Balance", self.balance)
            .with("Points", self.points)
            .with(
                "UpdatedAt",
                self.updated_at.map_or(ColumnValue::Now, ColumnValue::from),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SqlValue;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_serde_uses_column_names() {
        let wallet = UserWallet {
            user_id: 42,
            balance: 1000,
            points: 3,
            updated_at: None,
        };
        let value = serde_json::to_value(&wallet).unwrap();
        assert_eq!(
            value,
            json!({ "UserId": 42, "Balance": 1000, "Points": 3, "UpdatedAt": null })
        );
    }

    #[test]
    fn test_unset_timestamp_maps_to_now() {
        let mut wallet = UserWallet {
            user_id: 1,
            balance: 0,
            points: 0,
            updated_at: None,
        };
        assert_eq!(wallet.column_values().get("UpdatedAt"), Some(&ColumnValue::Now));

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        wallet.updated_at = Some(at);
        assert_eq!(
            wallet.column_values().get("UpdatedAt"),
            Some(&ColumnValue::Bind(SqlValue::from(at)))
        );
    }
}
