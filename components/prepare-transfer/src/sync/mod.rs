/// HDF5 decoding of sync recordings.
#[cfg(feature = "hdf5")]
pub mod hdf5_reader;
/// Sync file discovery, edge detection and the acquisition window.
#[allow(clippy::module_inception)]
pub mod sync;
