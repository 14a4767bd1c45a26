// vinst-common/src/model/mod.rs
pub mod artifact;

pub use artifact::{ExtractedTree, SourceArtifact};
