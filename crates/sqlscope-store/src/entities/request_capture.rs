//! RequestCapture entity, one row per profiled request

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "request_captures")]
pub struct Model {
    /// Capture UUID, rendered as text
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub method: String,
    pub request_path: String,

    /// Response status code
    pub status_code: Option<i32>,

    /// JSON-encoded response body snapshot
    #[sea_orm(column_type = "Text", nullable)]
    pub response_body: Option<String>,

    /// When the request started
    pub started_at: ChronoDateTimeUtc,

    pub is_n_plus_one: bool,

    #[sea_orm(column_type = "Text", nullable)]
    pub n_plus_one_suggestion: Option<String>,

    /// JSON-encoded Vec<IndexSuggestion>, set by the index advisor
    #[sea_orm(column_type = "Text", nullable)]
    pub index_suggestions: Option<String>,

    /// When the index advisor last looked at this capture
    pub analyzed_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::captured_statement::Entity")]
    CapturedStatement,

    #[sea_orm(has_many = "super::statement_table::Entity")]
    StatementTable,
}

impl Related<super::captured_statement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CapturedStatement.def()
    }
}

impl Related<super::statement_table::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatementTable.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
