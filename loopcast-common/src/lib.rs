//! # Loopcast Common Library
//!
//! Shared code for the Loopcast streaming service:
//! - Error type and result alias
//! - Root folder and config file resolution
//! - Database initialization (event log schema)
//! - Log event model and the push-notification EventBus
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
