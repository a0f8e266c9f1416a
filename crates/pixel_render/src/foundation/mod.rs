//! Foundation utilities shared by every layer of the library

pub mod logging;
pub mod report;

pub use report::{report, fatal, reported_count, OrFatal, OrReport, Severity};
