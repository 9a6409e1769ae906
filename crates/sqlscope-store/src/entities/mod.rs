//! Database entities

pub mod captured_statement;
pub mod request_capture;
pub mod statement_table;

pub use captured_statement::Entity as CapturedStatement;
pub use request_capture::Entity as RequestCapture;
pub use statement_table::Entity as StatementTable;

pub mod prelude {
    pub use super::captured_statement::Entity as CapturedStatement;
    pub use super::request_capture::Entity as RequestCapture;
    pub use super::statement_table::Entity as StatementTable;
}
