//! # Page Capture
//!
//! Backend for capturing web pages as PNG screenshots with a small pool of
//! headless Chrome workers.
//!
//! A capture request goes through four stages:
//!
//! | Stage | Type | Role |
//! |-------|------|------|
//! | Cache | [`ResultCache`] | Answers repeat requests for 5 minutes without touching a browser |
//! | Admission | [`AdmissionQueue`] | Caps concurrent renders, queues the rest by priority |
//! | Rendering | [`WorkerPool`] | Leases pre-launched Chrome workers, launching overflow workers on bursts |
//! | Enrichment | [`BackgroundEnricher`] | Extracts page text from the PNG after the response is sent |
//!
//! [`CaptureCoordinator`] wires these together and is what the HTTP layer and
//! the CLI talk to.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_capture::{CaptureCoordinator, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = CaptureCoordinator::with_chrome(Config::default());
//!     coordinator.start().await?;
//!
//!     let artifact = coordinator.capture("https://example.com").await?;
//!     println!("Captured {} bytes", artifact.data.len());
//!
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! page-capture serve --port 3000 --metrics
//! page-capture capture --url https://example.com --output example.png
//! page-capture batch --input urls.txt --output captures/ --progress-interval 5
//! ```

/// Configuration and settings
pub mod config;

/// Error types
pub mod error;

/// Render worker capability and the headless Chrome backend
pub mod render;

/// Pool of leased render workers
pub mod worker_pool;

/// Concurrency-limited priority queue for capture tasks
pub mod admission;

/// Capture output type
pub mod artifact;

/// TTL result cache
pub mod cache;

/// Background text extraction
pub mod enrichment;

/// Capture pipeline orchestration
pub mod coordinator;

/// HTTP routes
pub mod server;

/// Health reporting
pub mod health;

/// Bulk URL processing
pub mod batch;

/// Command-line interface implementation
pub mod cli;

/// Metrics recording and the Prometheus exporter
pub mod telemetry;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;

pub use admission::*;
pub use artifact::*;
pub use batch::*;
pub use cache::*;
pub use cli::*;
pub use config::*;
pub use coordinator::*;
pub use enrichment::*;
pub use error::*;
pub use health::*;
pub use render::*;
pub use server::*;
pub use telemetry::*;
pub use utils::*;
pub use worker_pool::*;
