//! Operation reporting.

use crate::error::ItemFailure;

/// Outcome of an extraction run.
///
/// Per-item failures do not abort the run; they accumulate here so a
/// caller can see both what succeeded and what did not. `cancelled`
/// distinguishes a caller-initiated stop from a completed run.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Number of files written to their destination.
    pub files_extracted: usize,
    /// Number of directories created.
    pub directories_created: usize,
    /// Total uncompressed bytes that reached a real destination.
    pub bytes_written: u64,
    /// Number of items skipped by caller decision.
    pub skipped: usize,
    /// Whether the run was stopped cooperatively before the end.
    pub cancelled: bool,
    /// Non-fatal failures, one per affected item.
    pub failures: Vec<ItemFailure>,
}

impl ExtractionReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the run completed with no failures and no cancellation.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

/// Outcome of a compression or modification run.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Number of items packed into the output.
    pub files_added: usize,
    /// Total source bytes read.
    pub bytes_read: u64,
    /// Whether the run was stopped cooperatively before the end.
    pub cancelled: bool,
    /// Non-fatal failures, one per affected item.
    pub failures: Vec<ItemFailure>,
    /// Complaints that did not stop the run, e.g. custom parameters
    /// colliding with derived settings.
    pub warnings: Vec<String>,
}

impl UpdateReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the run completed with no failures and no cancellation.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OperationResult;
    use crate::error::FailureKind;

    #[test]
    fn test_new_reports_are_clean() {
        assert!(ExtractionReport::new().is_clean());
        assert!(UpdateReport::new().is_clean());
    }

    #[test]
    fn test_failures_make_report_dirty() {
        let mut report = ExtractionReport::new();
        report.failures.push(ItemFailure {
            index: 1,
            path: None,
            kind: FailureKind::Engine(OperationResult::DataError),
        });
        assert!(!report.is_clean());
    }

    #[test]
    fn test_cancelled_report_is_not_clean() {
        let report = UpdateReport {
            cancelled: true,
            ..UpdateReport::default()
        };
        assert!(!report.is_clean());
    }
}
