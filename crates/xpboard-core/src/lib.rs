//! XPBoard Core Types and Traits
//!
//! This crate provides the fundamental pieces of the dashboard backend:
//! - Record model for transaction and progress entries
//! - The query engine (filter, order, limit, aggregate)
//! - The record repository abstraction and the in-memory mock dataset
//! - Core error types

pub mod error;
pub mod query;
pub mod record;
pub mod repository;

pub use error::{Error, Result};
pub use query::{Aggregate, Direction, FilterSpec, OrderSpec, PassFail, Predicate};
pub use record::Record;
pub use repository::{InMemoryRepository, RecordRepository, User};
