//! Delivery of packages to the remote repository.
//!
//! The remote only accepts transfers over a slow, stateful session protocol;
//! that protocol lives behind the [`DeliveryClient`] trait. Errors classify
//! themselves as transient or permanent so the processor knows whether to
//! retry.
//!
//! [`FsDeliveryClient`] is a drop-box implementation: it moves the package
//! into an outbox directory watched by a transfer agent and signals
//! completeness with a ready marker file.

mod config;
mod error;
mod fs_delivery;
mod traits;

pub use config::FsDeliveryConfig;
pub use error::DeliveryError;
pub use fs_delivery::FsDeliveryClient;
pub use traits::{DeliveryClient, DeliveryReceipt, DeliveryRequest};
