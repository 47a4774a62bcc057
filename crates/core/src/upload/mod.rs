//! Chunked upload assembly and submission intake.
//!
//! Clients upload every file of a submission in independent chunks. The
//! [`UploadAssembler`] writes each chunk into the per-user, per-submission
//! folder and tracks which files are complete; [`SubmissionIntake`] hands a
//! completed upload to the package builder and enqueues the result.
//!
//! Session tracking is in memory. A restart forgets partial uploads and the
//! client has to start the upload over.

mod assembler;
mod config;
mod error;
mod intake;
mod types;

pub use assembler::UploadAssembler;
pub use config::UploadConfig;
pub use error::UploadError;
pub use intake::{IntakeOutcome, SubmissionIntake};
pub use types::{
    AssembledFile, AssembledSubmission, ChunkReceipt, ChunkUpload, FileKind, FileProgress,
    UploadSessionSnapshot,
};
