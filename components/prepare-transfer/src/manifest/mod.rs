/// Manifest model and generation.
#[allow(clippy::module_inception)]
pub mod manifest;
/// Recursive file search behind the modality globs.
pub mod search;
