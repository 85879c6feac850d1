use serde::Serialize;

/// Whether a worker's returned value counts as success.
///
/// Workers return `Result<T, E>`; an `Err` is always an error. `T` decides
/// between success and a reported failure.
pub trait Outcome {
    fn succeeded(&self) -> bool {
        true
    }
}

impl Outcome for bool {
    fn succeeded(&self) -> bool {
        *self
    }
}

impl Outcome for () {}

/// How one unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Succeeded,
    /// The worker returned a value that reports failure.
    Failed,
    /// The worker returned an error or panicked.
    Errored,
    /// Never started because the batch was cancelled.
    Cancelled,
}

impl DispatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchOutcome::Succeeded => "ok",
            DispatchOutcome::Failed => "failed",
            DispatchOutcome::Errored => "error",
            DispatchOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport<T> {
    pub label: String,
    pub outcome: DispatchOutcome,
    /// The worker's value, when it returned one.
    pub value: Option<T>,
    pub error: Option<String>,
}

impl<T> UnitReport<T> {
    pub(crate) fn cancelled(label: String) -> Self {
        Self {
            label,
            outcome: DispatchOutcome::Cancelled,
            value: None,
            error: None,
        }
    }
}

/// Per-unit results in input order, plus whether cancellation was triggered.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport<T> {
    pub units: Vec<UnitReport<T>>,
    pub cancelled: bool,
}

impl<T> Default for DispatchReport<T> {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            cancelled: false,
        }
    }
}

impl<T> DispatchReport<T> {
    /// False if cancellation was ever triggered, else the AND of all units.
    pub fn success(&self) -> bool {
        !self.cancelled
            && self
                .units
                .iter()
                .all(|u| u.outcome == DispatchOutcome::Succeeded)
    }

    pub fn count(&self, outcome: DispatchOutcome) -> usize {
        self.units.iter().filter(|u| u.outcome == outcome).count()
    }

    /// Fold a second pass into this one; success of the result is the AND of both.
    pub fn absorb(&mut self, other: DispatchReport<T>) {
        self.units.extend(other.units);
        self.cancelled |= other.cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(label: &str, outcome: DispatchOutcome) -> UnitReport<bool> {
        UnitReport {
            label: label.to_string(),
            outcome,
            value: None,
            error: None,
        }
    }

    #[test]
    fn empty_report_succeeds() {
        assert!(DispatchReport::<()>::default().success());
    }

    #[test]
    fn any_non_success_fails_the_batch() {
        let report = DispatchReport {
            units: vec![
                unit("a", DispatchOutcome::Succeeded),
                unit("b", DispatchOutcome::Failed),
            ],
            cancelled: false,
        };
        assert!(!report.success());
        assert_eq!(report.count(DispatchOutcome::Failed), 1);
    }

    #[test]
    fn cancellation_fails_the_batch() {
        let report = DispatchReport {
            units: vec![unit("a", DispatchOutcome::Succeeded)],
            cancelled: true,
        };
        assert!(!report.success());
    }

    #[test]
    fn absorbing_a_pass_ands_the_results() {
        let mut first = DispatchReport {
            units: vec![unit("a", DispatchOutcome::Succeeded)],
            cancelled: false,
        };
        assert!(first.success());
        first.absorb(DispatchReport {
            units: vec![unit("b", DispatchOutcome::Errored)],
            cancelled: true,
        });
        assert_eq!(first.units.len(), 2);
        assert!(first.cancelled);
        assert!(!first.success());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(DispatchOutcome::Cancelled.to_string(), "cancelled");
        assert!(!false.succeeded());
        assert!(().succeeded());
    }
}
