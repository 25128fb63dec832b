//! # CDB Common Library
//!
//! Shared code for the Community Data Backbone services including:
//! - Base error type
//! - Configuration loading and root folder resolution
//! - Database initialization and schema
//! - Shared models (entity kinds, run metadata, provenance actions)

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use error::{Error, Result};
