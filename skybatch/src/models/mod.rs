//! Data models for batch runs

pub mod run;
pub mod work_item;

pub use run::{summarize, RunReport, RunRequest};
pub use work_item::{ItemStatus, WorkItem};
