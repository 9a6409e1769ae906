//! StatementTable entity
//!
//! Flattened (capture, statement, table) triples so table usage can be
//! aggregated in SQL instead of decoding the JSON column of every statement.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "statement_tables")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub capture_id: String,
    pub position: i32,
    pub table_name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::request_capture::Entity",
        from = "Column::CaptureId",
        to = "super::request_capture::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    RequestCapture,
}

impl Related<super::request_capture::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RequestCapture.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
