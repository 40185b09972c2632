//! Database pool and transcription cache bootstrap

pub mod init;
pub mod models;

pub use init::*;
pub use models::*;
