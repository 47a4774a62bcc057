//! Package building.
//!
//! Turns an assembled upload into the transfer-ready package the delivery
//! client ships. Format conversion (template instance to repository XML) is
//! owned by an external collaborator implementing [`PackageBuilder`];
//! [`DirectoryPackageBuilder`] packages the assembled folder as-is with a
//! checksummed manifest.

mod dir_builder;
mod error;
mod traits;

pub use dir_builder::{DirectoryPackageBuilder, MANIFEST_FILE_NAME};
pub use error::PackageError;
pub use traits::{Package, PackageBuilder, PackageFile};
