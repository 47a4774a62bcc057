//! Submission status notifications.
//!
//! The processor reports every state it persists through a
//! [`StatusNotifier`]. Notification is one-way: failures are logged by the
//! caller and never affect the submission.

mod events;
mod handle;
mod log_notifier;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use log_notifier::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;
