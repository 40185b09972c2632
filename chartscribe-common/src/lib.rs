//! # ChartScribe Common Library
//!
//! Shared code for the ChartScribe reporting backend:
//! - Error types
//! - Configuration loading and resolution
//! - Database pool and transcription cache bootstrap
//! - Persisted models

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
