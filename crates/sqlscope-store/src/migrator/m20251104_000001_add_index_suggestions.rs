//! Migration to store index advisor output on request_captures

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(RequestCaptures::Table)
                    .add_column(ColumnDef::new(RequestCaptures::IndexSuggestions).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(RequestCaptures::Table)
                    .add_column(
                        ColumnDef::new(RequestCaptures::AnalyzedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(RequestCaptures::Table)
                    .drop_column(RequestCaptures::AnalyzedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(RequestCaptures::Table)
                    .drop_column(RequestCaptures::IndexSuggestions)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum RequestCaptures {
    Table,
    IndexSuggestions,
    AnalyzedAt,
}
