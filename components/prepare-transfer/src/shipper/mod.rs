/// Python `logging` records and their wire framing.
pub mod record;
/// Tracing layer, buffering and the TCP worker.
#[allow(clippy::module_inception)]
pub mod shipper;
