use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one checkout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    Created,
    PendingWebhook,
    Confirmed,
    Failed,
    Expired,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "created",
            IntentStatus::PendingWebhook => "pending_webhook",
            IntentStatus::Confirmed => "confirmed",
            IntentStatus::Failed => "failed",
            IntentStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(IntentStatus::Created),
            "pending_webhook" => Some(IntentStatus::PendingWebhook),
            "confirmed" => Some(IntentStatus::Confirmed),
            "failed" => Some(IntentStatus::Failed),
            "expired" => Some(IntentStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Confirmed | IntentStatus::Failed | IntentStatus::Expired
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub cart_id: Uuid,
    pub provider: String,
    /// Amount in minor units (paisa); totals never use floating point
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    /// Provider session reference returned when the session was opened
    pub provider_ref: Option<String>,
    pub shipping_address: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }
        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}
