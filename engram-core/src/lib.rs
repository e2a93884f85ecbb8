//! Core types shared across the Engram resource layer.

pub mod error;

pub use error::{EngramError, Result};
