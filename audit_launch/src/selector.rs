//! Choice of the sample size of every target contest.

use std::collections::BTreeMap;

use log::{debug, info};
use snafu::{ensure, OptionExt, Snafu};

use crate::config::*;
use crate::error::*;
use crate::task_watcher::SampleSizeTaskWatcher;

pub const CUSTOM_OPTION_LABEL: &str = "Enter your own sample size (not recommended)";

/// Upper bounds for a hand-entered sample size.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct SizeLimits {
    pub unit: SampleUnit,
    /// Ballots of the contest, or batches of its universe for batch
    /// comparison audits.
    pub total: u64,
    pub cvr: u64,
    pub non_cvr: u64,
}

impl SizeLimits {
    pub fn for_contest(snapshot: &AuditSnapshot, contest: &Contest) -> SizeLimits {
        let audit_type = snapshot.audit_type();
        let universe = snapshot.universe(contest);
        let total = match audit_type {
            AuditType::BatchComparison => universe
                .iter()
                .map(|j| j.ballot_manifest.num_batches.unwrap_or(0))
                .sum(),
            AuditType::BallotPolling | AuditType::BallotComparison | AuditType::Hybrid => {
                contest.total_ballots_cast
            }
        };
        // Falls back to the contest total when a manifest does not say.
        let manifest_sum = |count: fn(&FileSlot) -> Option<u64>| -> u64 {
            let counts: Option<Vec<u64>> =
                universe.iter().map(|j| count(&j.ballot_manifest)).collect();
            match counts {
                Some(counts) if !counts.is_empty() => counts.iter().sum(),
                _ => contest.total_ballots_cast,
            }
        };
        SizeLimits {
            unit: audit_type.sample_unit(),
            total,
            cvr: manifest_sum(|m| m.num_ballots_cvr),
            non_cvr: manifest_sum(|m| m.num_ballots_non_cvr),
        }
    }
}

/// A hand-entered size, kept as typed.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum CustomEntry {
    Total(String),
    Split { cvr: String, non_cvr: String },
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Selection {
    Option(String),
    Custom(CustomEntry),
}

/// Problems with a selection, shown next to the input.
#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
pub enum ValidationError {
    #[snafu(display("Must choose a sample size"))]
    Missing,

    #[snafu(display("Must be a whole number"))]
    NotAWholeNumber,

    #[snafu(display("Must be at least 1"))]
    TooSmall,

    #[snafu(display("Must be less than or equal to {limit} (the total number of {unit} in the contest)"))]
    TooLarge { limit: u64, unit: String },
}

fn parse_whole(text: &str) -> Result<u64, ValidationError> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| ValidationError::NotAWholeNumber)
}

fn at_most(value: u64, limit: u64, unit: &str) -> Result<u64, ValidationError> {
    if value > limit {
        Err(ValidationError::TooLarge {
            limit,
            unit: unit.to_string(),
        })
    } else {
        Ok(value)
    }
}

/// Turns a typed entry into an option, or says what is wrong with it.
pub fn validate_custom(
    entry: &CustomEntry,
    limits: &SizeLimits,
) -> Result<SampleSizeOption, ValidationError> {
    match entry {
        CustomEntry::Total(text) => {
            let size = parse_whole(text)?;
            if size == 0 {
                return Err(ValidationError::TooSmall);
            }
            at_most(size, limits.total, &limits.unit.to_string())?;
            Ok(SampleSizeOption::custom(size))
        }
        CustomEntry::Split { cvr, non_cvr } => {
            let cvr = at_most(parse_whole(cvr)?, limits.cvr, "CVR ballots")?;
            let non_cvr = at_most(parse_whole(non_cvr)?, limits.non_cvr, "non-CVR ballots")?;
            let size = cvr.saturating_add(non_cvr);
            if size == 0 {
                return Err(ValidationError::TooSmall);
            }
            at_most(size, limits.total, &limits.unit.to_string())?;
            Ok(SampleSizeOption::custom_split(cvr, non_cvr))
        }
    }
}

fn percent(prob: f64) -> u64 {
    (prob * 100.0).round() as u64
}

pub fn option_label(option: &SampleSizeOption) -> String {
    match (&option.key, option.size, option.prob) {
        (OptionKey::Custom, _, _) => CUSTOM_OPTION_LABEL.to_string(),
        (_, SampleSize::Split { cvr, non_cvr }, _) => format!(
            "{} samples ({} CVR ballots and {} non-CVR ballots)",
            option.total(),
            cvr,
            non_cvr
        ),
        (OptionKey::Named(key), SampleSize::Total(size), Some(prob)) if key == OptionKey::ASN => {
            format!(
                "{} samples (BRAVO Average Sample Number - {}% chance of completing the audit in one round)",
                size,
                percent(prob)
            )
        }
        (_, SampleSize::Total(size), Some(prob)) => format!(
            "{} samples ({}% chance of completing the audit in one round)",
            size,
            percent(prob)
        ),
        (_, SampleSize::Total(size), None) => format!("{} samples", size),
    }
}

#[derive(PartialEq, Debug, Clone)]
struct ContestSelection {
    options: Vec<SampleSizeOption>,
    /// The selection recorded by the service when the round was launched.
    recorded: Option<SampleSizeOption>,
    selection: Option<Selection>,
}

fn recorded_selection(option: &SampleSizeOption) -> Selection {
    match (&option.key, option.size) {
        (OptionKey::Named(key), _) => Selection::Option(key.clone()),
        (OptionKey::Custom, SampleSize::Total(size)) => {
            Selection::Custom(CustomEntry::Total(size.to_string()))
        }
        (OptionKey::Custom, SampleSize::Split { cvr, non_cvr }) => {
            Selection::Custom(CustomEntry::Split {
                cvr: cvr.to_string(),
                non_cvr: non_cvr.to_string(),
            })
        }
    }
}

/// The current selection of every contest whose options are known.
///
/// Selections survive polling as long as the options of the contest stay the
/// same. New options reset the contest to its first option.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct SampleSizeSelector {
    contests: BTreeMap<String, ContestSelection>,
    locked: bool,
    split_sizes: bool,
}

impl SampleSizeSelector {
    pub fn sync(&mut self, snapshot: &AuditSnapshot, watcher: &SampleSizeTaskWatcher) {
        self.locked = snapshot.is_locked();
        self.split_sizes = snapshot.audit_type() == AuditType::Hybrid;
        let completed = watcher.completed();
        self.contests
            .retain(|cid, _| completed.contains_key(cid.as_str()));
        for (contest_id, (options, recorded)) in completed {
            if let Some(current) = self.contests.get(contest_id) {
                if current.options.as_slice() == options && current.recorded.as_ref() == recorded {
                    continue;
                }
            }
            let selection = match (self.locked, recorded) {
                (true, Some(recorded)) => Some(recorded_selection(recorded)),
                _ => options
                    .first()
                    .map(|o| Selection::Option(o.key.as_str().to_string())),
            };
            debug!("sync: contest {} defaults to {:?}", contest_id, selection);
            self.contests.insert(
                contest_id.to_string(),
                ContestSelection {
                    options: options.to_vec(),
                    recorded: recorded.cloned(),
                    selection,
                },
            );
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn options(&self, contest_id: &str) -> Option<&[SampleSizeOption]> {
        self.contests.get(contest_id).map(|c| c.options.as_slice())
    }

    pub fn selection(&self, contest_id: &str) -> Option<&Selection> {
        self.contests
            .get(contest_id)
            .and_then(|c| c.selection.as_ref())
    }

    fn editable(&mut self, contest_id: &str) -> AuditResult<&mut ContestSelection> {
        ensure!(!self.locked, SelectionLockedSnafu {});
        self.contests
            .get_mut(contest_id)
            .context(OptionsUnavailableSnafu { contest_id })
    }

    pub fn select_option(&mut self, contest_id: &str, key: &str) -> AuditResult<()> {
        if key == OptionKey::CUSTOM {
            return self.select_custom(contest_id);
        }
        let contest = self.editable(contest_id)?;
        ensure!(
            contest.options.iter().any(|o| o.key.as_str() == key),
            UnknownOptionSnafu { contest_id, key }
        );
        contest.selection = Some(Selection::Option(key.to_string()));
        info!("Contest {}: selected sample size option {}", contest_id, key);
        Ok(())
    }

    /// Switches to a hand-entered size. A previous entry is kept.
    pub fn select_custom(&mut self, contest_id: &str) -> AuditResult<()> {
        let split = self.split_sizes;
        let contest = self.editable(contest_id)?;
        if !matches!(contest.selection, Some(Selection::Custom(_))) {
            let entry = if split {
                CustomEntry::Split {
                    cvr: String::new(),
                    non_cvr: String::new(),
                }
            } else {
                CustomEntry::Total(String::new())
            };
            contest.selection = Some(Selection::Custom(entry));
        }
        Ok(())
    }

    /// Enters a single custom size. Hybrid audits take a split instead.
    pub fn edit_custom(&mut self, contest_id: &str, text: &str) -> AuditResult<()> {
        let split = self.split_sizes;
        let contest = self.editable(contest_id)?;
        ensure!(!split, SplitSizeRequiredSnafu { contest_id });
        debug!("edit_custom: contest {}: {:?}", contest_id, text);
        contest.selection = Some(Selection::Custom(CustomEntry::Total(text.to_string())));
        Ok(())
    }

    pub fn edit_custom_split(
        &mut self,
        contest_id: &str,
        cvr: &str,
        non_cvr: &str,
    ) -> AuditResult<()> {
        let split = self.split_sizes;
        let contest = self.editable(contest_id)?;
        ensure!(split, SplitSizeUnsupportedSnafu { contest_id });
        debug!(
            "edit_custom_split: contest {}: {:?} + {:?}",
            contest_id, cvr, non_cvr
        );
        contest.selection = Some(Selection::Custom(CustomEntry::Split {
            cvr: cvr.to_string(),
            non_cvr: non_cvr.to_string(),
        }));
        Ok(())
    }

    /// The chosen option of a contest, or the reason it cannot be used.
    /// `None` while the options of the contest are unknown.
    ///
    /// Once locked, the recorded selection is returned as is.
    pub fn validated(
        &self,
        contest_id: &str,
        limits: &SizeLimits,
    ) -> Option<Result<SampleSizeOption, ValidationError>> {
        let contest = self.contests.get(contest_id)?;
        if self.locked {
            if let Some(recorded) = &contest.recorded {
                return Some(Ok(recorded.clone()));
            }
        }
        let res = match &contest.selection {
            None => Err(ValidationError::Missing),
            Some(Selection::Option(key)) => contest
                .options
                .iter()
                .find(|o| o.key.as_str() == key)
                .cloned()
                .ok_or(ValidationError::Missing),
            Some(Selection::Custom(entry)) => validate_custom(entry, limits),
        };
        Some(res)
    }

    /// The launch payload, when every target contest has a valid selection.
    pub fn size_map(&self, snapshot: &AuditSnapshot) -> Option<SampleSizeMap> {
        let targets = snapshot.target_contests();
        if targets.is_empty() {
            return None;
        }
        let mut sizes = SampleSizeMap::new();
        for contest in targets {
            let limits = SizeLimits::for_contest(snapshot, contest);
            match self.validated(&contest.id, &limits) {
                Some(Ok(option)) => {
                    sizes.insert(contest.id.clone(), option);
                }
                _ => return None,
            }
        }
        Some(sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_watcher::{Precondition, SampleSizeTask};

    fn limits(total: u64) -> SizeLimits {
        SizeLimits {
            unit: SampleUnit::Ballots,
            total,
            cvr: total,
            non_cvr: total,
        }
    }

    fn snapshot(audit_type: AuditType, round: Option<RoundInfo>) -> AuditSnapshot {
        serde_json::from_value(serde_json::json!({
            "settings": {"auditName": "Test Audit", "auditType": audit_type, "riskLimit": 10, "randomSeed": "1234", "state": "AL"},
            "jurisdictions": [{
                "id": "jurisdiction-id-1",
                "name": "Jurisdiction One",
                "ballotManifest": {"processing": {"status": "PROCESSED", "error": null}, "numBallots": 30, "numBatches": 20},
                "batchTallies": null,
                "cvrs": null,
                "currentRoundStatus": null
            }],
            "contests": [{
                "id": "contest-id",
                "name": "Contest 1",
                "isTargeted": true,
                "choices": [],
                "numWinners": 1,
                "votesAllowed": 1,
                "totalBallotsCast": 30,
                "jurisdictionIds": ["jurisdiction-id-1"]
            }],
            "standardizations": null,
            "round": round
        }))
        .unwrap()
    }

    fn watcher_with(options: Vec<SampleSizeOption>, selected: Option<SampleSizeOption>) -> SampleSizeTaskWatcher {
        let mut w = SampleSizeTaskWatcher::default();
        w.set_precondition(
            "contest-id",
            Precondition::Met {
                trigger: "t".to_string(),
            },
        );
        let req = w.due_requests().remove(0);
        w.accept(&req.ticket, SampleSizeTask::Complete { options, selected });
        w
    }

    fn ballot_polling_options() -> Vec<SampleSizeOption> {
        vec![
            SampleSizeOption::named("asn", 20, Some(0.54)),
            SampleSizeOption::named("0.7", 21, Some(0.7)),
            SampleSizeOption::named("0.9", 4, None),
        ]
    }

    #[test]
    fn custom_size_above_total_is_rejected() {
        let err = validate_custom(&CustomEntry::Total("40".to_string()), &limits(30)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Must be less than or equal to 30 (the total number of ballots in the contest)"
        );
        assert_eq!(
            validate_custom(&CustomEntry::Total("5".to_string()), &limits(30)),
            Ok(SampleSizeOption::custom(5))
        );
        assert_eq!(
            validate_custom(&CustomEntry::Total("0".to_string()), &limits(30)),
            Err(ValidationError::TooSmall)
        );
        assert_eq!(
            validate_custom(&CustomEntry::Total("abc".to_string()), &limits(30)),
            Err(ValidationError::NotAWholeNumber)
        );
    }

    #[test]
    fn batch_limit_counts_batches() {
        let s = snapshot(AuditType::BatchComparison, None);
        let l = SizeLimits::for_contest(&s, &s.contests[0]);
        assert_eq!(l.total, 20);
        let err = validate_custom(&CustomEntry::Total("40".to_string()), &l).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Must be less than or equal to 20 (the total number of batches in the contest)"
        );
    }

    #[test]
    fn hybrid_split_adds_up() {
        let entry = CustomEntry::Split {
            cvr: "10".to_string(),
            non_cvr: "20".to_string(),
        };
        assert_eq!(
            validate_custom(&entry, &limits(30)),
            Ok(SampleSizeOption::custom_split(10, 20))
        );
        let zero = CustomEntry::Split {
            cvr: "0".to_string(),
            non_cvr: "0".to_string(),
        };
        assert_eq!(validate_custom(&zero, &limits(30)), Err(ValidationError::TooSmall));
    }

    #[test]
    fn hybrid_takes_only_split_entries() {
        let s = snapshot(AuditType::Hybrid, None);
        let suite = SampleSizeOption {
            key: OptionKey::parse("suite"),
            size: SampleSize::Split { cvr: 5, non_cvr: 10 },
            prob: None,
        };
        let w = watcher_with(vec![suite], None);
        let mut sel = SampleSizeSelector::default();
        sel.sync(&s, &w);
        sel.select_custom("contest-id").unwrap();
        assert!(matches!(
            sel.edit_custom("contest-id", "25"),
            Err(AuditError::SplitSizeRequired { .. })
        ));
        assert!(sel.size_map(&s).is_none());
        sel.edit_custom_split("contest-id", "10", "15").unwrap();
        assert_eq!(
            serde_json::to_value(sel.size_map(&s).unwrap()).unwrap(),
            serde_json::json!({"contest-id": {"key": "custom", "size": 25, "prob": null, "sizeCvr": 10, "sizeNonCvr": 15}})
        );
    }

    #[test]
    fn split_entries_need_a_hybrid_audit() {
        let s = snapshot(AuditType::BallotPolling, None);
        let w = watcher_with(ballot_polling_options(), None);
        let mut sel = SampleSizeSelector::default();
        sel.sync(&s, &w);
        assert!(matches!(
            sel.edit_custom_split("contest-id", "10", "15"),
            Err(AuditError::SplitSizeUnsupported { .. })
        ));
        assert_eq!(
            sel.selection("contest-id"),
            Some(&Selection::Option("asn".to_string()))
        );
    }

    #[test]
    fn labels() {
        let opts = ballot_polling_options();
        assert_eq!(
            option_label(&opts[0]),
            "20 samples (BRAVO Average Sample Number - 54% chance of completing the audit in one round)"
        );
        assert_eq!(
            option_label(&opts[1]),
            "21 samples (70% chance of completing the audit in one round)"
        );
        assert_eq!(option_label(&opts[2]), "4 samples");
        assert_eq!(
            option_label(&SampleSizeOption {
                key: OptionKey::parse("suite"),
                size: SampleSize::Split { cvr: 3, non_cvr: 7 },
                prob: None
            }),
            "10 samples (3 CVR ballots and 7 non-CVR ballots)"
        );
        assert_eq!(option_label(&SampleSizeOption::custom(5)), CUSTOM_OPTION_LABEL);
    }

    #[test]
    fn first_option_is_the_default() {
        let s = snapshot(AuditType::BallotPolling, None);
        let w = watcher_with(ballot_polling_options(), None);
        let mut sel = SampleSizeSelector::default();
        sel.sync(&s, &w);
        assert_eq!(
            sel.selection("contest-id"),
            Some(&Selection::Option("asn".to_string()))
        );
        let map = sel.size_map(&s).unwrap();
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            serde_json::json!({"contest-id": {"key": "asn", "size": 20, "prob": 0.54}})
        );
    }

    #[test]
    fn selection_survives_identical_sync() {
        let s = snapshot(AuditType::BallotPolling, None);
        let w = watcher_with(ballot_polling_options(), None);
        let mut sel = SampleSizeSelector::default();
        sel.sync(&s, &w);
        sel.select_option("contest-id", "0.7").unwrap();
        sel.sync(&s, &w);
        assert_eq!(
            sel.selection("contest-id"),
            Some(&Selection::Option("0.7".to_string()))
        );
        assert!(matches!(
            sel.select_option("contest-id", "0.8"),
            Err(AuditError::UnknownOption { .. })
        ));
    }

    #[test]
    fn new_options_reset_the_selection() {
        let s = snapshot(AuditType::BallotPolling, None);
        let mut sel = SampleSizeSelector::default();
        sel.sync(&s, &watcher_with(ballot_polling_options(), None));
        sel.select_option("contest-id", "0.9").unwrap();
        let mut options = ballot_polling_options();
        options[0].size = SampleSize::Total(22);
        sel.sync(&s, &watcher_with(options, None));
        assert_eq!(
            sel.selection("contest-id"),
            Some(&Selection::Option("asn".to_string()))
        );
    }

    #[test]
    fn custom_edits_flow_into_the_payload() {
        let s = snapshot(AuditType::BallotPolling, None);
        let w = watcher_with(ballot_polling_options(), None);
        let mut sel = SampleSizeSelector::default();
        sel.sync(&s, &w);
        sel.select_custom("contest-id").unwrap();
        sel.edit_custom("contest-id", "40").unwrap();
        assert!(sel.size_map(&s).is_none());
        sel.edit_custom("contest-id", "5").unwrap();
        assert_eq!(
            serde_json::to_value(sel.size_map(&s).unwrap()).unwrap(),
            serde_json::json!({"contest-id": {"key": "custom", "size": 5, "prob": null}})
        );
    }

    #[test]
    fn locked_mode_shows_recorded_selection() {
        let s = snapshot(
            AuditType::BallotPolling,
            Some(RoundInfo {
                round_num: 1,
                is_audit_complete: false,
            }),
        );
        let w = watcher_with(ballot_polling_options(), Some(SampleSizeOption::custom(100)));
        let mut sel = SampleSizeSelector::default();
        sel.sync(&s, &w);
        assert!(sel.is_locked());
        assert_eq!(
            sel.selection("contest-id"),
            Some(&Selection::Custom(CustomEntry::Total("100".to_string())))
        );
        assert_eq!(
            sel.validated("contest-id", &limits(30)),
            Some(Ok(SampleSizeOption::custom(100)))
        );
        assert!(matches!(
            sel.select_option("contest-id", "asn"),
            Err(AuditError::SelectionLocked {})
        ));
        assert!(matches!(
            sel.edit_custom("contest-id", "5"),
            Err(AuditError::SelectionLocked {})
        ));
    }
}
