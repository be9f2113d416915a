//! # Roomsort Common Library
//!
//! Shared code for the roomsort services:
//! - Error and result types
//! - Configuration loading (TOML + environment overrides)
//! - Workflow event types and the broadcast event bus
//! - Time and budget-window helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
