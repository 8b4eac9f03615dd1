//! # PIM Common Library
//!
//! Shared code for the product-imagery services including:
//! - Error types
//! - Pipeline event types (PimEvent enum) and the broadcast EventBus
//! - Configuration loading (root folder resolution, TOML config file)
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
