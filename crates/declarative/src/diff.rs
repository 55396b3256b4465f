//! Summaries over finished drift reports

use crate::types::DriftReport;

/// Drift summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftSummary {
    /// Number of resources whose deployed state differs
    pub drifted: usize,
    /// Number of resources already matching their declaration
    pub in_sync: usize,
    /// Number of resources with validation errors
    pub invalid: usize,
}

impl DriftSummary {
    /// Create a summary from a list of reports
    pub fn from_reports(reports: &[DriftReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            if report.has_drift() {
                summary.drifted += 1;
            } else {
                summary.in_sync += 1;
            }
            if !report.is_valid() {
                summary.invalid += 1;
            }
        }
        summary
    }

    /// Total number of resources compared
    pub fn total(&self) -> usize {
        self.drifted + self.in_sync
    }

    /// Check if there are any differences
    pub fn has_changes(&self) -> bool {
        self.drifted > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let reports = vec![
            DriftReport::new("a", "+x\n"),
            DriftReport::new("b", ""),
            DriftReport::new("c", "").with_validation_errors(vec!["bad".into()]),
        ];
        let summary = DriftSummary::from_reports(&reports);

        assert_eq!(summary.drifted, 1);
        assert_eq!(summary.in_sync, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.total(), 3);
        assert!(summary.has_changes());
    }

    #[test]
    fn test_empty_summary() {
        let summary = DriftSummary::from_reports(&[]);
        assert_eq!(summary, DriftSummary::default());
        assert!(!summary.has_changes());
    }
}
