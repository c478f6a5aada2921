use snafu::Snafu;

use crate::BlockingReason;

/// Errors returned by the operations of a review session.
///
/// Validation and full hand tally problems are not errors: they are part of
/// the review output (see [`crate::selector::ValidationError`] and
/// [`crate::full_hand_tally::FullHandTallyError`]).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuditError {
    #[snafu(display("The audit has already been launched, sample sizes cannot be changed"))]
    SelectionLocked {},

    #[snafu(display("Unknown target contest {contest_id}"))]
    UnknownContest { contest_id: String },

    #[snafu(display("Sample size options for contest {contest_id} are not available yet"))]
    OptionsUnavailable { contest_id: String },

    #[snafu(display("Contest {contest_id} has no sample size option {key}"))]
    UnknownOption { contest_id: String, key: String },

    #[snafu(display(
        "Contest {contest_id}: hybrid audits take separate CVR and non-CVR sample sizes"
    ))]
    SplitSizeRequired { contest_id: String },

    #[snafu(display(
        "Contest {contest_id}: only hybrid audits take separate CVR and non-CVR sample sizes"
    ))]
    SplitSizeUnsupported { contest_id: String },

    #[snafu(display("Unknown jurisdiction {jurisdiction_id}"))]
    UnknownJurisdiction { jurisdiction_id: String },

    #[snafu(display(
        "Jurisdiction {jurisdiction_id} has no CVR contest named {cvr_contest_name}"
    ))]
    UnknownCvrContest {
        jurisdiction_id: String,
        cvr_contest_name: String,
    },

    #[snafu(display("Cannot launch the audit: {reason}"))]
    NotReady { reason: BlockingReason },

    #[snafu(display("{message}"))]
    InvalidRoundRequest { message: String },

    #[snafu(display("Call to the audit service failed: {operation}"))]
    Service {
        operation: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type AuditResult<T> = Result<T, AuditError>;
