//! # Mimic-Core
//!
//! Core types for the mimic human motion imitation pipeline: body model
//! parameters, per-frame body details, the camera strategies used when a
//! source identity is re-posed, and the shared error taxonomy.

pub mod error;
pub mod swap;
pub mod types;

pub use error::{Error, Result};
pub use swap::*;
pub use types::*;
