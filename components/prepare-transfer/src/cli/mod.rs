/// Command-line parsing and dispatch.
#[allow(clippy::module_inception)]
pub mod cli;
