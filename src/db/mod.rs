//! Database module: view models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `daily_briefing::db`; the repository
//! API and view models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{Candidate, LabelCount};
