mod config;
mod error;
use log::{debug, info};

use std::fmt::Display;

pub use crate::config::*;
pub use crate::error::*;

pub mod builder;
pub mod full_hand_tally;
pub mod launch;
pub mod manual;
pub mod preview;
pub mod review;
pub mod selector;
pub mod service;
pub mod standardization;
pub mod status;
pub mod task_watcher;

use crate::full_hand_tally::{FullHandTallyError, FullHandTallyVerdict};
use crate::selector::{option_label, SampleSizeSelector, Selection, SizeLimits, ValidationError};
use crate::standardization::StandardizationReconciler;
use crate::status::uploads_complete;
use crate::task_watcher::{BlockedReason, SampleSizeTaskWatcher, WatchState};

pub const LOADING_MESSAGE: &str = "Loading sample size options...";

// ********* Launch decision ***********

/// The first thing standing between the audit and its launch.
#[derive(PartialEq, Debug, Clone)]
pub enum BlockingReason {
    AlreadyLaunched,
    UploadsIncomplete,
    StandardizationIncomplete,
    NoTargetContests,
    SampleSizesLoading,
    /// The message of the service, verbatim.
    SampleSizesErrored(String),
    InvalidSelection {
        contest_name: String,
        error: ValidationError,
    },
    FullHandTally(FullHandTallyError),
}

impl Display for BlockingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockingReason::AlreadyLaunched => write!(f, "The audit has already been launched."),
            BlockingReason::UploadsIncomplete => {
                write!(f, "{}", BlockedReason::FilesNotUploaded)
            }
            BlockingReason::StandardizationIncomplete => {
                write!(f, "{}", BlockedReason::StandardizationIncomplete)
            }
            BlockingReason::NoTargetContests => {
                write!(f, "At least one target contest is required to launch the audit.")
            }
            BlockingReason::SampleSizesLoading => write!(f, "{}", LOADING_MESSAGE),
            BlockingReason::SampleSizesErrored(message) => write!(f, "{}", message),
            BlockingReason::InvalidSelection {
                contest_name,
                error,
            } => write!(f, "{}: {}", contest_name, error),
            BlockingReason::FullHandTally(e) => write!(f, "{}", e),
        }
    }
}

impl From<BlockedReason> for BlockingReason {
    fn from(reason: BlockedReason) -> Self {
        match reason {
            BlockedReason::FilesNotUploaded => BlockingReason::UploadsIncomplete,
            BlockedReason::StandardizationIncomplete => BlockingReason::StandardizationIncomplete,
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct LaunchReadiness {
    pub ready: bool,
    pub reason: Option<BlockingReason>,
}

impl LaunchReadiness {
    fn ready() -> LaunchReadiness {
        LaunchReadiness {
            ready: true,
            reason: None,
        }
    }

    fn blocked(reason: BlockingReason) -> LaunchReadiness {
        debug!("evaluate_launch_readiness: blocked: {:?}", reason);
        LaunchReadiness {
            ready: false,
            reason: Some(reason),
        }
    }
}

/// Decides whether the next round can be launched.
///
/// Checks run in a fixed order and only the first failure is reported: the
/// lock, then uploads, standardization, the sample size calculation, the
/// selections, and finally the full hand tally policy.
pub fn evaluate_launch_readiness(
    snapshot: &AuditSnapshot,
    reconciler: Option<&StandardizationReconciler>,
    watcher: &SampleSizeTaskWatcher,
    selector: &SampleSizeSelector,
) -> LaunchReadiness {
    if snapshot.is_locked() {
        return LaunchReadiness::blocked(BlockingReason::AlreadyLaunched);
    }

    // Every jurisdiction, not only those of the target contests.
    if !snapshot.jurisdictions.iter().all(uploads_complete) {
        return LaunchReadiness::blocked(BlockingReason::UploadsIncomplete);
    }

    if snapshot.audit_type().uses_cvrs() {
        let complete = reconciler
            .map(|r| r.is_complete(&snapshot.contests))
            .unwrap_or(false);
        if !complete {
            return LaunchReadiness::blocked(BlockingReason::StandardizationIncomplete);
        }
    }

    let targets = snapshot.target_contests();
    if targets.is_empty() {
        return LaunchReadiness::blocked(BlockingReason::NoTargetContests);
    }
    for contest in targets.iter() {
        match watcher.state(&contest.id) {
            Some(WatchState::Blocked(reason)) => {
                return LaunchReadiness::blocked((*reason).into())
            }
            Some(WatchState::Errored { message, .. }) => {
                return LaunchReadiness::blocked(BlockingReason::SampleSizesErrored(
                    message.clone(),
                ))
            }
            Some(WatchState::Complete { .. }) => {}
            Some(WatchState::Loading { .. }) | None => {
                return LaunchReadiness::blocked(BlockingReason::SampleSizesLoading)
            }
        }
    }

    let mut chosen = Vec::new();
    for contest in targets.iter() {
        let limits = SizeLimits::for_contest(snapshot, contest);
        match selector.validated(&contest.id, &limits) {
            None => return LaunchReadiness::blocked(BlockingReason::SampleSizesLoading),
            Some(Err(error)) => {
                return LaunchReadiness::blocked(BlockingReason::InvalidSelection {
                    contest_name: contest.name.clone(),
                    error,
                })
            }
            Some(Ok(option)) => chosen.push((*contest, option, limits)),
        }
    }

    for (contest, option, limits) in chosen.iter() {
        let verdict = full_hand_tally::evaluate(
            snapshot.audit_type(),
            targets.len(),
            &contest.name,
            option.total(),
            limits.total,
        );
        if let FullHandTallyVerdict::Error(e) = verdict {
            return LaunchReadiness::blocked(BlockingReason::FullHandTally(e));
        }
    }

    info!("Audit {} is ready to launch", snapshot.settings.audit_name);
    LaunchReadiness::ready()
}

// ********* Per-contest review ***********

#[derive(PartialEq, Debug, Clone)]
pub struct OptionView {
    pub key: String,
    pub label: String,
}

/// What the review shows for one target contest.
#[derive(PartialEq, Debug, Clone)]
pub struct ContestReview {
    pub contest_id: String,
    pub contest_name: String,
    pub limits: SizeLimits,
    pub task: Option<WatchState>,
    pub options: Vec<OptionView>,
    pub selection: Option<Selection>,
    pub validation: Option<ValidationError>,
    /// Absent until the contest has a valid selection.
    pub full_hand_tally: Option<FullHandTallyVerdict>,
}

pub fn review_contests(
    snapshot: &AuditSnapshot,
    watcher: &SampleSizeTaskWatcher,
    selector: &SampleSizeSelector,
) -> Vec<ContestReview> {
    let targets = snapshot.target_contests();
    targets
        .iter()
        .map(|contest| {
            let limits = SizeLimits::for_contest(snapshot, contest);
            let mut options: Vec<OptionView> = selector
                .options(&contest.id)
                .unwrap_or(&[])
                .iter()
                .map(|o| OptionView {
                    key: o.key.as_str().to_string(),
                    label: option_label(o),
                })
                .collect();
            if selector.options(&contest.id).is_some() {
                options.push(OptionView {
                    key: OptionKey::CUSTOM.to_string(),
                    label: selector::CUSTOM_OPTION_LABEL.to_string(),
                });
            }
            let (validation, full_hand_tally) = match selector.validated(&contest.id, &limits) {
                Some(Ok(option)) => (
                    None,
                    Some(full_hand_tally::evaluate(
                        snapshot.audit_type(),
                        targets.len(),
                        &contest.name,
                        option.total(),
                        limits.total,
                    )),
                ),
                Some(Err(e)) => (Some(e), None),
                None => (None, None),
            };
            ContestReview {
                contest_id: contest.id.clone(),
                contest_name: contest.name.clone(),
                limits,
                task: watcher.state(&contest.id).cloned(),
                options,
                selection: selector.selection(&contest.id).cloned(),
                validation,
                full_hand_tally,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SnapshotBuilder;
    use crate::task_watcher::{PollRequest, SampleSizeTask};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn options() -> Vec<SampleSizeOption> {
        vec![
            SampleSizeOption::named("asn", 20, Some(0.54)),
            SampleSizeOption::named("0.7", 21, Some(0.7)),
        ]
    }

    /// Runs the watcher to completion with the same options for every contest.
    fn evaluate(
        snapshot: &AuditSnapshot,
        reconciler: Option<&StandardizationReconciler>,
        task: Option<SampleSizeTask>,
        edit: impl FnOnce(&mut SampleSizeSelector),
    ) -> LaunchReadiness {
        let mut watcher = SampleSizeTaskWatcher::default();
        watcher.update(snapshot, reconciler);
        if let Some(task) = task {
            let requests: Vec<PollRequest> = watcher.due_requests();
            for r in requests {
                watcher.accept(&r.ticket, task.clone());
            }
        }
        let mut selector = SampleSizeSelector::default();
        selector.sync(snapshot, &watcher);
        edit(&mut selector);
        evaluate_launch_readiness(snapshot, reconciler, &watcher, &selector)
    }

    fn complete() -> Option<SampleSizeTask> {
        Some(SampleSizeTask::Complete {
            options: options(),
            selected: None,
        })
    }

    #[test]
    fn ready_with_default_selection() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .build();
        let r = evaluate(&s, None, complete(), |_| {});
        assert_eq!(r, LaunchReadiness::ready());
    }

    #[test]
    fn uploads_come_first() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotComparison)
            .jurisdiction("j1", 30)
            .pending_jurisdiction("j2")
            .target_contest("contest-id", "Contest 1", 30, &["j1", "j2"])
            .build();
        let r = evaluate(&s, None, None, |_| {});
        assert_eq!(r.reason, Some(BlockingReason::UploadsIncomplete));
        assert_eq!(
            r.reason.unwrap().to_string(),
            "All jurisdiction files must be uploaded and all audit settings must be configured in order to calculate the sample size."
        );
    }

    #[test]
    fn failed_upload_outside_target_contests_blocks() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .failed_jurisdiction("j2", "Invalid manifest")
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .opportunistic_contest("contest-id-2", "Contest 2", 10, &["j2"])
            .build();
        assert_eq!(
            crate::status::jurisdiction_status(&s.jurisdictions[1]),
            crate::status::JurisdictionProgressStatus::UploadsFailed
        );
        // The calculation of the target contest is not held back.
        let r = evaluate(&s, None, complete(), |_| {});
        assert_eq!(r.reason, Some(BlockingReason::UploadsIncomplete));

        // Nor by a jurisdiction that is in no contest at all.
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .pending_jurisdiction("j3")
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .build();
        let r = evaluate(&s, None, complete(), |_| {});
        assert_eq!(r.reason, Some(BlockingReason::UploadsIncomplete));
    }

    #[test]
    fn standardization_blocks_cvr_audits() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotComparison)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .unresolved_standardization("j1", "Contest 1", &["Contest One"])
            .build();
        let reconciler = s
            .standardizations
            .as_ref()
            .map(StandardizationReconciler::from_response);
        let r = evaluate(&s, reconciler.as_ref(), None, |_| {});
        assert_eq!(r.reason, Some(BlockingReason::StandardizationIncomplete));
        // Without any mapping at all.
        let r = evaluate(&s, None, None, |_| {});
        assert_eq!(r.reason, Some(BlockingReason::StandardizationIncomplete));
    }

    #[test]
    fn loading_and_errored_tasks_block() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .build();
        let r = evaluate(&s, None, Some(SampleSizeTask::InProgress), |_| {});
        assert_eq!(r.reason, Some(BlockingReason::SampleSizesLoading));
        let r = evaluate(
            &s,
            None,
            Some(SampleSizeTask::Errored {
                message: "sample sizes error".to_string(),
            }),
            |_| {},
        );
        assert_eq!(
            r.reason,
            Some(BlockingReason::SampleSizesErrored("sample sizes error".to_string()))
        );
    }

    #[test]
    fn no_target_contest_blocks() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .build();
        let r = evaluate(&s, None, None, |_| {});
        assert_eq!(r.reason, Some(BlockingReason::NoTargetContests));
    }

    #[test]
    fn invalid_custom_size_blocks() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .build();
        let r = evaluate(&s, None, complete(), |sel| {
            sel.edit_custom("contest-id", "40").unwrap();
        });
        assert_eq!(
            r.reason.unwrap().to_string(),
            "Contest 1: Must be less than or equal to 30 (the total number of ballots in the contest)"
        );
        let r = evaluate(&s, None, complete(), |sel| {
            sel.edit_custom("contest-id", "5").unwrap();
        });
        assert!(r.ready);
    }

    #[test]
    fn full_hand_tally_single_target_is_only_a_warning() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .build();
        let r = evaluate(&s, None, complete(), |sel| {
            sel.edit_custom("contest-id", "30").unwrap();
        });
        assert!(r.ready);
    }

    #[test]
    fn full_hand_tally_with_two_targets_blocks() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .target_contest("contest-id-2", "Contest 2", 30, &["j1"])
            .build();
        let r = evaluate(&s, None, complete(), |sel| {
            sel.edit_custom("contest-id-2", "30").unwrap();
        });
        match r.reason {
            Some(BlockingReason::FullHandTally(e)) => {
                assert!(e.to_string().contains("Contest 2"));
            }
            other => panic!("unexpected reason {:?}", other),
        }
    }

    #[test]
    fn ballot_comparison_full_hand_tally_blocks() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotComparison)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .standardized("j1", "Contest 1", "Contest One")
            .build();
        let reconciler = s
            .standardizations
            .as_ref()
            .map(StandardizationReconciler::from_response);
        let r = evaluate(&s, reconciler.as_ref(), complete(), |sel| {
            sel.edit_custom("contest-id", "30").unwrap();
        });
        assert!(matches!(r.reason, Some(BlockingReason::FullHandTally(_))));
        assert!(!r.ready);
    }

    #[test]
    fn hybrid_is_never_a_full_hand_tally() {
        init();
        let s = SnapshotBuilder::new(AuditType::Hybrid)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .build();
        let reconciler = StandardizationReconciler::default();
        let r = evaluate(&s, Some(&reconciler), complete(), |sel| {
            sel.edit_custom_split("contest-id", "10", "20").unwrap();
        });
        assert!(r.ready);
    }

    #[test]
    fn hybrid_custom_size_needs_a_split() {
        init();
        let s = SnapshotBuilder::new(AuditType::Hybrid)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .build();
        let reconciler = StandardizationReconciler::default();
        let r = evaluate(&s, Some(&reconciler), complete(), |sel| {
            sel.select_custom("contest-id").unwrap();
            assert!(matches!(
                sel.edit_custom("contest-id", "25"),
                Err(AuditError::SplitSizeRequired { .. })
            ));
        });
        assert_eq!(
            r.reason,
            Some(BlockingReason::InvalidSelection {
                contest_name: "Contest 1".to_string(),
                error: ValidationError::NotAWholeNumber,
            })
        );
    }

    #[test]
    fn locked_audit_is_not_ready() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .round(1)
            .build();
        let r = evaluate(&s, None, complete(), |_| {});
        assert_eq!(r.reason, Some(BlockingReason::AlreadyLaunched));
    }

    #[test]
    fn contest_review_lists_options_and_verdict() {
        init();
        let s = SnapshotBuilder::new(AuditType::BallotPolling)
            .jurisdiction("j1", 30)
            .target_contest("contest-id", "Contest 1", 30, &["j1"])
            .opportunistic_contest("contest-id-2", "Contest 2", 30, &["j1"])
            .build();
        let mut watcher = SampleSizeTaskWatcher::default();
        watcher.update(&s, None);
        for r in watcher.due_requests() {
            watcher.accept(&r.ticket, complete().unwrap());
        }
        let mut selector = SampleSizeSelector::default();
        selector.sync(&s, &watcher);
        selector.edit_custom("contest-id", "30").unwrap();
        let reviews = review_contests(&s, &watcher, &selector);
        assert_eq!(reviews.len(), 1);
        let labels: Vec<&str> = reviews[0].options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "20 samples (BRAVO Average Sample Number - 54% chance of completing the audit in one round)",
                "21 samples (70% chance of completing the audit in one round)",
                "Enter your own sample size (not recommended)",
            ]
        );
        assert_eq!(
            reviews[0].full_hand_tally,
            Some(FullHandTallyVerdict::Warning)
        );
    }
}
