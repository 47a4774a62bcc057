//! Queue processor: the single consumer of the submission queue.
//!
//! Delivers submissions strictly in enqueue order, one at a time:
//! - Transient delivery failures are retried with linear backoff up to
//!   `retry.max_attempts` attempts
//! - Permanent failures fail the submission immediately
//! - Every persisted state change is reported to the status notifier
//!
//! A durable `InFlight` row found at startup has an unknown outcome and is
//! retried.
//!
//! # Example
//!
//! ```ignore
//! use submitter_core::processor::{ProcessorConfig, QueueProcessor};
//!
//! let processor = QueueProcessor::new(config, queue, delivery, notifier);
//! processor.start().await?;
//!
//! let status = processor.status().await;
//! println!("Pending submissions: {}", status.pending);
//!
//! processor.stop().await;
//! ```

mod config;
mod runner;
mod types;

pub use config::{ProcessorConfig, RetryConfig};
pub use runner::QueueProcessor;
pub use types::{ProcessorError, ProcessorStatus};
