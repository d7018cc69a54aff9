//! Conversation entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String, // canonical pair id or store-assigned uuid
    pub participant_a: String, // lexicographically smaller participant
    pub participant_b: String,
    pub roles_json: String, // JSON array, snapshot at creation
    pub last_message: Option<String>,
    pub last_message_id: Option<String>,
    pub last_message_read_by: Option<String>, // JSON array of user ids
    pub last_updated: i64,
    pub created_at: i64,
    pub initiated_by: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::messages::Entity")]
    Messages,
}

impl Related<super::messages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
