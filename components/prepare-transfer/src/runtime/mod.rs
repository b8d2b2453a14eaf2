/// Session processing, configuration resolution and the full run.
#[allow(clippy::module_inception)]
pub mod runtime;
