//! Mapping of CVR contest names to the audit's contest names.
//!
//! Jurisdictions upload their CVR files independently, and the contest names
//! found in them do not always match the names of the target and
//! opportunistic contests. Each mismatching pair has to be resolved explicitly
//! by the audit administrator; nothing is matched automatically.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use snafu::ensure;

use crate::config::*;
use crate::error::*;

/// A (jurisdiction, contest) pair waiting for a CVR contest name.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct UnresolvedStandardization {
    pub jurisdiction_id: String,
    pub contest_name: String,
    /// The contest names found in the jurisdiction's CVR file.
    pub cvr_contest_names: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum StandardizationStatus {
    /// The audit type does not use CVRs.
    NotApplicable,
    Incomplete(Vec<UnresolvedStandardization>),
    Complete,
}

impl StandardizationStatus {
    pub fn message(&self) -> Option<&'static str> {
        match self {
            StandardizationStatus::NotApplicable => None,
            StandardizationStatus::Incomplete(_) => Some(
                "Some contest names in the CVR files do not match the target/opportunistic contest names.",
            ),
            StandardizationStatus::Complete => Some(
                "All contest names in the CVR files have been standardized to match the target/opportunistic contest names.",
            ),
        }
    }
}

// The key is (jurisdiction id, contest name).
type PairKey = (String, String);

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct StandardizationReconciler {
    resolutions: BTreeMap<PairKey, Option<String>>,
    cvr_contest_names: BTreeMap<String, BTreeSet<String>>,
}

impl StandardizationReconciler {
    pub fn from_response(response: &ContestNameStandardizations) -> StandardizationReconciler {
        let mut resolutions: BTreeMap<PairKey, Option<String>> = BTreeMap::new();
        for (jurisdiction_id, contests) in response.standardizations.iter() {
            for (contest_name, cvr_name) in contests.iter() {
                resolutions.insert(
                    (jurisdiction_id.clone(), contest_name.clone()),
                    cvr_name.clone(),
                );
            }
        }
        let cvr_contest_names = response
            .cvr_contest_names
            .iter()
            .map(|(jid, names)| (jid.clone(), names.iter().cloned().collect()))
            .collect();
        StandardizationReconciler {
            resolutions,
            cvr_contest_names,
        }
    }

    /// The current resolution of a pair. `None` when the pair is unknown,
    /// `Some(None)` when it is known but unresolved.
    pub fn resolution(&self, jurisdiction_id: &str, contest_name: &str) -> Option<Option<&str>> {
        self.resolutions
            .get(&(jurisdiction_id.to_string(), contest_name.to_string()))
            .map(|r| r.as_deref())
    }

    fn in_scope(jurisdiction_id: &str, contest_name: &str, contests: &[Contest]) -> bool {
        match contests.iter().find(|c| c.name == contest_name) {
            Some(contest) => contest.in_universe(jurisdiction_id),
            // A name we cannot place still needs an answer.
            None => true,
        }
    }

    /// The pairs in scope that still have no CVR contest name, ordered by
    /// jurisdiction then contest name.
    pub fn unresolved(&self, contests: &[Contest]) -> Vec<UnresolvedStandardization> {
        self.resolutions
            .iter()
            .filter(|((jid, cname), resolution)| {
                resolution.is_none() && Self::in_scope(jid, cname, contests)
            })
            .map(|((jid, cname), _)| UnresolvedStandardization {
                jurisdiction_id: jid.clone(),
                contest_name: cname.clone(),
                cvr_contest_names: self
                    .cvr_contest_names
                    .get(jid)
                    .map(|names| names.iter().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect()
    }

    pub fn is_complete(&self, contests: &[Contest]) -> bool {
        self.unresolved(contests).is_empty()
    }

    pub fn status(&self, audit_type: AuditType, contests: &[Contest]) -> StandardizationStatus {
        if !audit_type.uses_cvrs() {
            return StandardizationStatus::NotApplicable;
        }
        let unresolved = self.unresolved(contests);
        if unresolved.is_empty() {
            StandardizationStatus::Complete
        } else {
            StandardizationStatus::Incomplete(unresolved)
        }
    }

    /// Merges a partial update into the mapping.
    ///
    /// Pairs not mentioned in the update are left alone. A null value
    /// explicitly un-resolves the pair. The update is checked as a whole
    /// before anything is written.
    pub fn apply(&mut self, update: &StandardizationUpdate) -> AuditResult<()> {
        for (jurisdiction_id, contests) in update.iter() {
            let known_names = self.cvr_contest_names.get(jurisdiction_id);
            let has_pairs = self.resolutions.keys().any(|(jid, _)| jid == jurisdiction_id);
            ensure!(
                known_names.is_some() || has_pairs,
                UnknownJurisdictionSnafu {
                    jurisdiction_id: jurisdiction_id.as_str()
                }
            );
            for cvr_name in contests.values().flatten() {
                let known = known_names.map(|n| n.contains(cvr_name)).unwrap_or(false);
                ensure!(
                    known,
                    UnknownCvrContestSnafu {
                        jurisdiction_id: jurisdiction_id.as_str(),
                        cvr_contest_name: cvr_name.as_str(),
                    }
                );
            }
        }
        for (jurisdiction_id, contests) in update.iter() {
            for (contest_name, cvr_name) in contests.iter() {
                debug!(
                    "apply: {} / {} -> {:?}",
                    jurisdiction_id, contest_name, cvr_name
                );
                self.resolutions.insert(
                    (jurisdiction_id.clone(), contest_name.clone()),
                    cvr_name.clone(),
                );
            }
        }
        info!(
            "Applied contest name standardizations for {} jurisdiction(s)",
            update.len()
        );
        Ok(())
    }

    /// The whole mapping, in the shape expected by the service.
    pub fn to_update(&self) -> StandardizationUpdate {
        let mut update: StandardizationUpdate = BTreeMap::new();
        for ((jid, cname), resolution) in self.resolutions.iter() {
            update
                .entry(jid.clone())
                .or_default()
                .insert(cname.clone(), resolution.clone());
        }
        update
    }

    /// A digest of the mapping. It changes whenever any resolution changes.
    pub fn fingerprint(&self) -> String {
        let mut s = String::new();
        for ((jid, cname), resolution) in self.resolutions.iter() {
            s.push_str(&format!("{:?}\u{1f}{:?}\u{1f}{:?}\u{1e}", jid, cname, resolution));
        }
        sha256::digest(s.as_str())
    }
}
