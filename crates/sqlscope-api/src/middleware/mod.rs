//! API Middleware
//!
//! Middleware layers for profiling the SQL issued while handling requests.

pub mod profiling;

pub use profiling::{instrument, profile_requests};
