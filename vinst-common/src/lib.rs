// vinst-common/src/lib.rs
pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod model;

// Re-export key types
pub use config::Config;
pub use error::{Result, VinstError};
pub use manifest::{ReleaseSpec, SourceDescriptor, SourceKind};
pub use model::{ExtractedTree, SourceArtifact};
