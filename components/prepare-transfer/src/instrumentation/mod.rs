/// Subscriber setup, panic hook and run markers.
pub mod tracing;
