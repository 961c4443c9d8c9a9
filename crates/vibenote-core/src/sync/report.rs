use std::fmt;

use serde::Serialize;

/// Outcome of one push run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Notes that got a new remote document
    pub created: usize,
    /// Notes merged into their existing remote document
    pub updated: usize,
    /// Notes whose remote write failed; they stay pending
    pub failed: usize,
    /// Notes written remotely but edited locally meanwhile; they stay pending
    pub left_pending: usize,
    /// Notes deleted locally while their push was in flight
    pub discarded: usize,
}

impl PushReport {
    /// Whether nothing was left for a later push
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.left_pending == 0
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} failed",
            self.created, self.updated, self.failed
        )?;
        if self.left_pending > 0 {
            write!(f, ", {} edited during push", self.left_pending)?;
        }
        Ok(())
    }
}

/// Outcome of applying one batch of remote changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Remote documents inserted as new local notes
    pub inserted: usize,
    /// Local notes overwritten by a strictly newer remote snapshot
    pub updated: usize,
    /// Uncorrelated local notes matched to a remote document
    pub matched: usize,
    /// Local notes removed because their document was removed
    pub removed: usize,
    /// Changes that left the store untouched
    pub ignored: usize,
    /// Changes that could not be written locally
    pub failed: usize,
}

impl ApplyReport {
    /// Whether the batch changed any local note
    pub const fn changed_anything(&self) -> bool {
        self.inserted + self.updated + self.matched + self.removed > 0
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} updated, {} removed",
            self.inserted,
            self.updated + self.matched,
            self.removed
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_report_display_mentions_mid_push_edits() {
        let report = PushReport {
            created: 2,
            left_pending: 1,
            ..PushReport::default()
        };
        assert_eq!(report.to_string(), "2 created, 0 updated, 0 failed, 1 edited during push");
        assert!(!report.is_clean());
    }

    #[test]
    fn empty_apply_report_changes_nothing() {
        let report = ApplyReport {
            ignored: 4,
            ..ApplyReport::default()
        };
        assert!(!report.changed_anything());
        assert_eq!(report.to_string(), "0 new, 0 updated, 0 removed");
    }
}
