//! Initial schema: request captures, their statements and the tables each
//! statement touches

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RequestCaptures::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RequestCaptures::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RequestCaptures::Method).string().not_null())
                    .col(
                        ColumnDef::new(RequestCaptures::RequestPath)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RequestCaptures::StatusCode).integer().null())
                    .col(ColumnDef::new(RequestCaptures::ResponseBody).text().null())
                    .col(
                        ColumnDef::new(RequestCaptures::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RequestCaptures::IsNPlusOne)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RequestCaptures::NPlusOneSuggestion)
                            .text()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_request_captures_started_at")
                    .table(RequestCaptures::Table)
                    .col(RequestCaptures::StartedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_request_captures_request_path")
                    .table(RequestCaptures::Table)
                    .col(RequestCaptures::RequestPath)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CapturedStatements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CapturedStatements::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::CaptureId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::Position)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CapturedStatements::Sql).text().not_null())
                    .col(ColumnDef::new(CapturedStatements::Params).text().not_null())
                    .col(
                        ColumnDef::new(CapturedStatements::ExecutionTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::ExecutionDuration)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::IsInTransaction)
                            .boolean()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::DbAlias)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::RowsAffected)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::DbVendor)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CapturedStatements::NeedsRollback)
                            .boolean()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CapturedStatements::Tables).text().not_null())
                    .col(
                        ColumnDef::new(CapturedStatements::Failed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_captured_statements_capture_id")
                            .from(CapturedStatements::Table, CapturedStatements::CaptureId)
                            .to(RequestCaptures::Table, RequestCaptures::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_captured_statements_capture_id")
                    .table(CapturedStatements::Table)
                    .col(CapturedStatements::CaptureId)
                    .col(CapturedStatements::Position)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StatementTables::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StatementTables::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StatementTables::CaptureId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StatementTables::Position)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StatementTables::TableName)
                            .string()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_statement_tables_capture_id")
                            .from(StatementTables::Table, StatementTables::CaptureId)
                            .to(RequestCaptures::Table, RequestCaptures::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_statement_tables_table_name")
                    .table(StatementTables::Table)
                    .col(StatementTables::TableName)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StatementTables::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CapturedStatements::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(RequestCaptures::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum RequestCaptures {
    Table,
    Id,
    Method,
    RequestPath,
    StatusCode,
    ResponseBody,
    StartedAt,
    IsNPlusOne,
    NPlusOneSuggestion,
}

#[derive(DeriveIden)]
enum CapturedStatements {
    Table,
    Id,
    CaptureId,
    Position,
    Sql,
    Params,
    ExecutionTime,
    ExecutionDuration,
    IsInTransaction,
    DbAlias,
    RowsAffected,
    DbVendor,
    NeedsRollback,
    Tables,
    Failed,
}

#[derive(DeriveIden)]
enum StatementTables {
    Table,
    Id,
    CaptureId,
    Position,
    TableName,
}
