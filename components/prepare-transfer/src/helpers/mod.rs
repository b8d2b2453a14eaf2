/// Data directory, cache and log locations, rig identity.
pub mod app_dirs;
/// Runtime settings and their overrides.
pub mod load_config;
/// Configuration server client and local cache.
pub mod source_config;
