//! Durable FIFO queue of submissions awaiting delivery.
//!
//! The store owns every [`Submission`] from enqueue until the processor
//! removes it in a terminal state. [`SubmissionQueue`] is the service object
//! shared between producers (which enqueue) and the single consumer.

mod service;
mod sqlite_store;
mod store;
mod types;

pub use service::{ConsumerLease, SubmissionQueue};
pub use sqlite_store::SqliteSubmissionStore;
pub use store::{QueueError, StoreLease, SubmissionFilter, SubmissionStore};
pub use types::{
    date_based_folder_name, destination_folder_name, Submission, SubmissionState, SubmissionType,
};
