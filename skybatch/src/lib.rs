//! skybatch library interface
//!
//! Batch dispatch of images to a rate-limited transformation service:
//! discovery with idempotent skip, pacing, retry with backoff, sequential
//! orchestration and a session-wide result aggregate.

pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod services;

pub use crate::controller::{BatchController, TaskHandle};
pub use crate::error::{BatchError, BatchResult};
pub use crate::models::{ItemStatus, RunReport, RunRequest, WorkItem};
