//! # Loopcast streamer library
//!
//! Uploads media into a content directory, supervises an external encoder
//! that re-streams the media to a live ingestion endpoint, and records the
//! encoder's progress and errors in a persistent event log.
//!
//! **Architecture:** leaf-first
//! - [`event_log`]: append-only store of per-session events
//! - [`media`]: video/audio content directories
//! - [`playlist`]: shuffled concat lists and input source descriptors
//! - [`encoder`]: encoder invocation and stream target
//! - [`supervisor`]: single-session lifecycle around the encoder process
//! - [`api`]: HTTP control surface

pub mod api;
pub mod config;
pub mod encoder;
pub mod error;
pub mod event_log;
pub mod media;
pub mod playlist;
pub mod supervisor;

pub use error::{Error, Result};
pub use supervisor::Supervisor;
