//! Bulk area-task downloads through the AppEEARS API.

pub mod batch;
pub mod client;
pub mod fetch;
pub mod task;

pub use batch::{BatchDownloader, BatchOptions};
pub use client::{AppeearsSession, DEFAULT_API_URL};
pub use task::{build_tasks, OutputFormat};
