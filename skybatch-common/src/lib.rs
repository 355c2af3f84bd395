//! # skybatch Common Library
//!
//! Shared code for the skybatch workspace including:
//! - Error types
//! - Event types (BatchEvent enum) and the EventBus
//! - Bootstrap configuration loading
//! - Rate-limit tiers and result naming conventions

pub mod config;
pub mod error;
pub mod events;
pub mod naming;
pub mod tier;

pub use error::{Error, Result};
pub use naming::ResultNaming;
pub use tier::RateTier;
