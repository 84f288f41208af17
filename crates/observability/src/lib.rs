//! Tracing/logging setup shared by the catalog binaries.

pub mod subscriber;

pub use subscriber::{LogFormat, ParseLogFormatError, init};
