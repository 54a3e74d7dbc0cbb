use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{HttpMethod, TargetStatus};
use crate::services::encryption_service::{EncryptionError, HeaderCipher};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "targets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    /// `[{"key": ..., "value": <hex ciphertext>}]`, see [`StoredHeader`].
    #[sea_orm(column_type = "JsonBinary")]
    pub headers: Json,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub body: Option<Json>,
    pub timeout_ms: i32,
    pub expected_status: i32,
    pub poll_interval_seconds: i32,
    pub is_active: bool,
    pub is_deleted: bool,
    pub status: TargetStatus,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
    pub next_due_at: ChronoDateTimeUtc,
    pub last_response_time_ms: i32,
    pub alert_recipient: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::ping::Entity")]
    Ping,
    #[sea_orm(has_many = "super::incident::Entity")]
    Incident,
    #[sea_orm(has_many = "super::insight::Entity")]
    Insight,
}

impl Related<super::ping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ping.def()
    }
}

impl Related<super::incident::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Incident.def()
    }
}

impl Related<super::insight::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Insight.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// A single header as persisted: the name in clear, the value encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub key: String,
    pub value: String,
}

impl Model {
    /// Whether the scheduler should probe this target at `now`.
    pub fn is_due(&self, now: ChronoDateTimeUtc) -> bool {
        self.is_active && !self.is_deleted && self.next_due_at <= now
    }

    pub fn poll_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.poll_interval_seconds.max(1)))
    }

    pub fn stored_headers(&self) -> Result<Vec<StoredHeader>, EncryptionError> {
        if self.headers.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(self.headers.clone()).map_err(EncryptionError::MalformedHeaders)
    }

    /// The headers to send with a probe, with every value decrypted.
    pub fn effective_headers(
        &self,
        cipher: &HeaderCipher,
    ) -> Result<Vec<(String, String)>, EncryptionError> {
        self.stored_headers()?
            .into_iter()
            .map(|h| Ok((h.key, cipher.decrypt(&h.value)?)))
            .collect()
    }
}
