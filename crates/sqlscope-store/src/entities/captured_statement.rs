//! CapturedStatement entity, one row per SQL statement of a capture

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "captured_statements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub capture_id: String,

    /// Execution order within the capture, starting at 0
    pub position: i32,

    #[sea_orm(column_type = "Text")]
    pub sql: String,

    /// JSON-encoded parameters
    #[sea_orm(column_type = "Text")]
    pub params: String,

    pub execution_time: ChronoDateTimeUtc,

    /// Elapsed time in seconds, measured on a monotonic clock
    #[sea_orm(column_type = "Double")]
    pub execution_duration: f64,

    pub is_in_transaction: bool,
    pub db_alias: String,
    pub rows_affected: Option<i64>,
    pub db_vendor: String,
    pub needs_rollback: bool,

    /// JSON-encoded sorted table names
    #[sea_orm(column_type = "Text")]
    pub tables: String,

    pub failed: bool,
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
