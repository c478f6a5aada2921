//! Detection of sample sizes that amount to a full hand tally.

use snafu::Snafu;

use crate::config::AuditType;

pub const FULL_HAND_TALLY_HEADLINE: &str =
    "The currently selected sample size for this contest requires a full hand tally.";

/// Full hand tallies that the audit cannot run as configured.
#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
pub enum FullHandTallyError {
    #[snafu(display(
        "Contest {contest_name}: Arlo supports running a full hand tally for audits with one target contest. Either remove this contest and audit it separately, or remove the other target contests."
    ))]
    MultipleTargetContests { contest_name: String },

    #[snafu(display(
        "Contest {contest_name}: To use Arlo for a full hand tally, recreate this audit using the ballot polling or batch comparison audit type."
    ))]
    ComparisonAudit { contest_name: String },
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FullHandTallyVerdict {
    /// The sample is smaller than the contest.
    NotFullHandTally,
    /// Allowed, but the operator should know.
    Warning,
    /// Blocks the launch.
    Error(FullHandTallyError),
    /// The audit type is exempt from the check.
    NotApplicable,
}

impl FullHandTallyVerdict {
    pub fn is_error(&self) -> bool {
        matches!(self, FullHandTallyVerdict::Error(_))
    }
}

pub fn is_full_hand_tally(size: u64, total: u64) -> bool {
    size >= total
}

/// Applies the full hand tally policy of the audit type to one contest.
///
/// `total` is the number of ballots of the contest, or the number of batches
/// for batch comparison audits. `num_target_contests` counts the target
/// contests of the whole audit.
pub fn evaluate(
    audit_type: AuditType,
    num_target_contests: usize,
    contest_name: &str,
    size: u64,
    total: u64,
) -> FullHandTallyVerdict {
    if audit_type == AuditType::Hybrid {
        return FullHandTallyVerdict::NotApplicable;
    }
    if !is_full_hand_tally(size, total) {
        return FullHandTallyVerdict::NotFullHandTally;
    }
    match audit_type {
        AuditType::BallotPolling if num_target_contests > 1 => {
            FullHandTallyVerdict::Error(FullHandTallyError::MultipleTargetContests {
                contest_name: contest_name.to_string(),
            })
        }
        AuditType::BallotPolling | AuditType::BatchComparison => FullHandTallyVerdict::Warning,
        AuditType::BallotComparison => {
            FullHandTallyVerdict::Error(FullHandTallyError::ComparisonAudit {
                contest_name: contest_name.to_string(),
            })
        }
        AuditType::Hybrid => FullHandTallyVerdict::NotApplicable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ballot_polling_single_target_warns() {
        assert_eq!(
            evaluate(AuditType::BallotPolling, 1, "Contest 1", 30, 30),
            FullHandTallyVerdict::Warning
        );
        assert_eq!(
            evaluate(AuditType::BallotPolling, 1, "Contest 1", 31, 30),
            FullHandTallyVerdict::Warning
        );
        assert_eq!(
            evaluate(AuditType::BallotPolling, 1, "Contest 1", 29, 30),
            FullHandTallyVerdict::NotFullHandTally
        );
    }

    #[test]
    fn ballot_polling_multiple_targets_fails() {
        let verdict = evaluate(AuditType::BallotPolling, 2, "Contest 2", 30, 30);
        assert!(verdict.is_error());
        match verdict {
            FullHandTallyVerdict::Error(e) => {
                let msg = e.to_string();
                assert_eq!(
                    msg,
                    "Contest 2: Arlo supports running a full hand tally for audits with one target contest. \
                     Either remove this contest and audit it separately, or remove the other target contests."
                );
            }
            _ => panic!("expected an error"),
        }
    }

    #[test]
    fn ballot_comparison_always_fails() {
        for n in 1..4 {
            assert_eq!(
                evaluate(AuditType::BallotComparison, n, "Contest 1", 30, 30),
                FullHandTallyVerdict::Error(FullHandTallyError::ComparisonAudit {
                    contest_name: "Contest 1".to_string()
                })
            );
        }
    }

    #[test]
    fn comparison_message() {
        let e = FullHandTallyError::ComparisonAudit {
            contest_name: "Contest 1".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Contest 1: To use Arlo for a full hand tally, recreate this audit using the ballot polling or batch comparison audit type."
        );
    }

    #[test]
    fn batch_comparison_warns() {
        assert_eq!(
            evaluate(AuditType::BatchComparison, 3, "Contest 1", 20, 20),
            FullHandTallyVerdict::Warning
        );
    }

    #[test]
    fn hybrid_is_exempt() {
        assert_eq!(
            evaluate(AuditType::Hybrid, 2, "Contest 1", 500, 30),
            FullHandTallyVerdict::NotApplicable
        );
    }
}
