pub mod config;
pub mod delivery;
pub mod notifier;
pub mod package;
pub mod processor;
pub mod queue;
pub mod testing;
pub mod upload;

pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use delivery::{DeliveryClient, DeliveryError, FsDeliveryClient};
pub use notifier::{create_status_system, LogNotifier, StatusEvent, StatusNotifier};
pub use processor::{ProcessorConfig, ProcessorError, QueueProcessor};
pub use queue::{SqliteSubmissionStore, Submission, SubmissionQueue, SubmissionState};
pub use upload::{SubmissionIntake, UploadAssembler, UploadError};
