//! # cardcat Common Library
//!
//! Shared code for the cardcat services including:
//! - Error and result types
//! - TOML configuration and root folder resolution
//! - Catalog event types (CatalogEvent enum) and the EventBus
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
