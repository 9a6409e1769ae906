//! Per-request SQL statement capture
//!
//! A [`CaptureHandle`] is created when a request starts and threaded through
//! to the database layer. Every statement executed through a
//! [`ProfiledDriver`] is appended to it as a [`StatementRecord`]. When the
//! request ends the capture is taken out of the handle, run through the
//! N+1 [`detector`] and handed to the store.

pub mod capture;
pub mod detector;
pub mod driver;
pub mod interceptor;
pub mod model;
pub mod relations;
pub mod sea_orm_driver;

pub use capture::CaptureHandle;
pub use detector::{annotate, detect, NPlusOneFinding, RelationKind};
pub use driver::{Driver, ExecutionContext, StatementCall};
pub use interceptor::ProfiledDriver;
pub use model::{
    IndexSuggestion, Params, RequestCapture, ResponseSnapshot, SqlParam, StatementRecord,
};
pub use relations::{RelationCatalog, RelationEdge, StaticRelations, TableRelations};
pub use sea_orm_driver::{SeaOrmDriver, SeaOrmOutput};
