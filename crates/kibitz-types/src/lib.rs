//! Shared domain types for the Kibitz labelling pipeline.

pub mod board;
pub mod config;
pub mod records;
pub mod score;

mod errors;

pub use errors::{KibitzError, Result};
