use crate::data::{ColumnMap, ColumnValue, Entity, FieldDef, FieldType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 群成员记录，主键为 (GroupId, UserId)，顺序即身份
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupMember {
    pub group_id: i64,
    pub user_id: i64,
    pub nickname: String,
    /// 群内积分
    pub credit: i64,
    pub joined_at: Option<DateTime<Utc>>,
}

impl Entity for GroupMember {
    const TABLE: &'static str = "group_member";
    const KEYS: &'static [&'static str] = &["GroupId", "UserId"];
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::new("GroupId", FieldType::Integer),
        FieldDef::new("UserId", FieldType::Integer),
        FieldDef::new("Nickname", FieldType::Text),
        FieldDef::new("Credit", FieldType::Integer),
        FieldDef::new("JoinedAt", FieldType::DateTime),
    ];

    fn column_values(&self) -> ColumnMap {
        ColumnMap::new()
            .with("GroupId", self.group_id)
            .with("UserId", self.user_id)
            .with("Nickname", self.nickname.as_str())
            .with("Credit", self.credit)
            .with(
                "JoinedAt",
                self.joined_at.map_or(ColumnValue::Now, ColumnValue::from),
            )
    }
}
