//! Database migrations

use sea_orm_migration::prelude::*;

mod m20251020_000001_create_capture_tables;
mod m20251104_000001_add_index_suggestions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251020_000001_create_capture_tables::Migration),
            Box::new(m20251104_000001_add_index_suggestions::Migration),
        ]
    }
}
