//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed rows returned by repositories (processing records,
//!   stored credentials) plus query filters.
//! - `repo`: SQL-only functions that map rows into those types.
//!
//! External modules should import from `fiscal_bridge::db` — we re-export
//! the repository API and the row models for convenience.

pub mod model;
pub mod repo;

pub use model::{FiscalStatus, NewRecord, ProcessingRecord, RecordFilter, StoredCredential};
pub use repo::*;
