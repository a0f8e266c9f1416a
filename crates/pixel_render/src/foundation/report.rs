//! Severity-tagged error reporting
//!
//! Every failure in the library falls into one of four severities. `Message`
//! and `Warning` never interrupt execution, `Error` aborts the operation that
//! produced it, and `Fatal` terminates the process once it has been logged.

use std::cell::Cell;
use std::fmt;

use crate::render::vulkan::VulkanResult;

/// How bad a reported condition is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Debug trace
    Message,
    /// Operation skipped, execution continues
    Warning,
    /// Operation aborted, caller-visible failure
    Error,
    /// Unrecoverable, the process terminates after reporting
    Fatal,
}

impl Severity {
    const fn slot(self) -> usize {
        match self {
            Self::Message => 0,
            Self::Warning => 1,
            Self::Error => 2,
            Self::Fatal => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal error",
        };
        f.write_str(name)
    }
}

thread_local! {
    static REPORTED: Cell<[usize; 4]> = const { Cell::new([0; 4]) };
}

fn count(severity: Severity) {
    REPORTED.with(|counts| {
        let mut current = counts.get();
        current[severity.slot()] += 1;
        counts.set(current);
    });
}

/// Number of reports of `severity` emitted by the current thread
pub fn reported_count(severity: Severity) -> usize {
    REPORTED.with(|counts| counts.get()[severity.slot()])
}

/// Report a condition at the given severity
///
/// `Fatal` does not return.
pub fn report(severity: Severity, message: impl fmt::Display) {
    match severity {
        Severity::Message => {
            count(severity);
            log::debug!("{}", message);
        }
        Severity::Warning => {
            count(severity);
            log::warn!("{}", message);
        }
        Severity::Error => {
            count(severity);
            log::error!("{}", message);
        }
        Severity::Fatal => fatal(message),
    }
}

/// Report a fatal error and terminate the process
pub fn fatal(message: impl fmt::Display) -> ! {
    count(Severity::Fatal);
    log::error!("fatal: {}", message);
    log::logger().flush();
    std::process::exit(1)
}

/// Terminate on any error; used where the library meets its caller
pub trait OrFatal<T> {
    /// Unwrap the value or report a fatal error prefixed with `context`
    fn or_fatal(self, context: &str) -> T;
}

impl<T> OrFatal<T> for VulkanResult<T> {
    fn or_fatal(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(format_args!("{}: {}", context, err)),
        }
    }
}

/// Report an error at its own severity and carry on without the value
pub trait OrReport<T> {
    /// `None` after reporting a non-fatal error; fatal errors terminate
    fn or_report(self, context: &str) -> Option<T>;
}

impl<T> OrReport<T> for VulkanResult<T> {
    fn or_report(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                report(err.severity(), format_args!("{}: {}", context, err));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::VulkanError;

    #[test]
    fn counters_are_per_severity() {
        let warnings = reported_count(Severity::Warning);
        let errors = reported_count(Severity::Error);

        report(Severity::Warning, "first");
        report(Severity::Warning, "second");
        report(Severity::Error, "third");

        assert_eq!(reported_count(Severity::Warning), warnings + 2);
        assert_eq!(reported_count(Severity::Error), errors + 1);
    }

    #[test]
    fn or_report_uses_the_error_severity() {
        let before = reported_count(Severity::Error);
        let result: VulkanResult<u32> = Err(VulkanError::InvalidOperation {
            reason: "not recording".to_string(),
        });

        assert_eq!(result.or_report("bind"), None);
        assert_eq!(reported_count(Severity::Error), before + 1);
    }

    #[test]
    fn or_report_passes_values_through() {
        let before = reported_count(Severity::Warning);
        let result: VulkanResult<u32> = Ok(7);
        assert_eq!(result.or_report("noop"), Some(7));
        assert_eq!(reported_count(Severity::Warning), before);
    }

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Message < Severity::Warning);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::Fatal.to_string(), "fatal error");
    }
}
