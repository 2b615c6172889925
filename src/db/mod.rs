//! Settings store: orientation, capture timing and the effect catalogue.
//!
//! This module is split into two submodules:
//! - `model`: update/input types and their validation.
//! - `repo`: SQL-only functions that map rows into domain types.
//!
//! External modules should import from `photobooth::db`; the repository API
//! and the input types are re-exported here.

use thiserror::Error;

pub mod model;
pub mod repo;

pub use model::{validate_effect_refs, EffectChange, EffectUpdate, NewEffect, SettingsUpdate};
pub use repo::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
