pub use crate::config::*;

/// A builder for audit snapshots.
///
/// It is meant for tests and demos: jurisdictions are added with all their
/// files processed unless stated otherwise.
///
/// ```
/// use audit_launch::builder::SnapshotBuilder;
/// use audit_launch::AuditType;
///
/// let snapshot = SnapshotBuilder::new(AuditType::BallotPolling)
///     .jurisdiction("jurisdiction-id-1", 30)
///     .target_contest("contest-id", "Contest 1", 30, &["jurisdiction-id-1"])
///     .build();
///
/// assert_eq!(snapshot.target_contests().len(), 1);
/// assert!(!snapshot.is_locked());
/// ```
pub struct SnapshotBuilder {
    pub(crate) _settings: AuditSettings,
    pub(crate) _jurisdictions: Vec<Jurisdiction>,
    pub(crate) _contests: Vec<Contest>,
    pub(crate) _standardizations: Option<ContestNameStandardizations>,
    pub(crate) _round: Option<RoundInfo>,
}

fn processed(num_ballots: u64) -> FileSlot {
    FileSlot {
        processing: Some(FileProcessing {
            status: FileProcessingStatus::Processed,
            error: None,
        }),
        num_ballots: Some(num_ballots),
        ..FileSlot::default()
    }
}

impl SnapshotBuilder {
    pub fn new(audit_type: AuditType) -> SnapshotBuilder {
        SnapshotBuilder {
            _settings: AuditSettings {
                audit_name: "Test Audit".to_string(),
                audit_type,
                risk_limit: Some(10),
                random_seed: Some("1234".to_string()),
                state: None,
            },
            _jurisdictions: Vec::new(),
            _contests: Vec::new(),
            _standardizations: None,
            _round: None,
        }
    }

    fn slots(&self, slot: FileSlot) -> (Option<FileSlot>, Option<FileSlot>) {
        let audit_type = self._settings.audit_type;
        let tallies = match audit_type {
            AuditType::BatchComparison => Some(slot.clone()),
            _ => None,
        };
        let cvrs = if audit_type.uses_cvrs() {
            Some(slot)
        } else {
            None
        };
        (tallies, cvrs)
    }

    /// Adds a jurisdiction whose files are all processed.
    pub fn jurisdiction(mut self, id: &str, num_ballots: u64) -> SnapshotBuilder {
        let (batch_tallies, cvrs) = self.slots(processed(num_ballots));
        self._jurisdictions.push(Jurisdiction {
            id: id.to_string(),
            name: id.to_string(),
            ballot_manifest: processed(num_ballots),
            batch_tallies,
            cvrs,
            current_round_status: None,
        });
        self
    }

    /// Adds a jurisdiction that has not uploaded anything yet.
    pub fn pending_jurisdiction(mut self, id: &str) -> SnapshotBuilder {
        let (batch_tallies, cvrs) = self.slots(FileSlot::default());
        self._jurisdictions.push(Jurisdiction {
            id: id.to_string(),
            name: id.to_string(),
            ballot_manifest: FileSlot::default(),
            batch_tallies,
            cvrs,
            current_round_status: None,
        });
        self
    }

    /// Adds a jurisdiction whose ballot manifest failed to process.
    pub fn failed_jurisdiction(mut self, id: &str, error: &str) -> SnapshotBuilder {
        let (batch_tallies, cvrs) = self.slots(FileSlot::default());
        self._jurisdictions.push(Jurisdiction {
            id: id.to_string(),
            name: id.to_string(),
            ballot_manifest: FileSlot {
                processing: Some(FileProcessing {
                    status: FileProcessingStatus::Errored,
                    error: Some(error.to_string()),
                }),
                ..FileSlot::default()
            },
            batch_tallies,
            cvrs,
            current_round_status: None,
        });
        self
    }

    fn contest(
        mut self,
        id: &str,
        name: &str,
        is_targeted: bool,
        total_ballots_cast: u64,
        jurisdiction_ids: &[&str],
    ) -> SnapshotBuilder {
        self._contests.push(Contest {
            id: id.to_string(),
            name: name.to_string(),
            is_targeted,
            choices: Vec::new(),
            num_winners: 1,
            votes_allowed: 1,
            total_ballots_cast,
            jurisdiction_ids: jurisdiction_ids.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn target_contest(
        self,
        id: &str,
        name: &str,
        total_ballots_cast: u64,
        jurisdiction_ids: &[&str],
    ) -> SnapshotBuilder {
        self.contest(id, name, true, total_ballots_cast, jurisdiction_ids)
    }

    pub fn opportunistic_contest(
        self,
        id: &str,
        name: &str,
        total_ballots_cast: u64,
        jurisdiction_ids: &[&str],
    ) -> SnapshotBuilder {
        self.contest(id, name, false, total_ballots_cast, jurisdiction_ids)
    }

    fn standardization(
        mut self,
        jurisdiction_id: &str,
        contest_name: &str,
        cvr_contest_names: &[&str],
        resolution: Option<&str>,
    ) -> SnapshotBuilder {
        let s = self._standardizations.get_or_insert_with(Default::default);
        s.standardizations
            .entry(jurisdiction_id.to_string())
            .or_default()
            .insert(contest_name.to_string(), resolution.map(|r| r.to_string()));
        let names = s
            .cvr_contest_names
            .entry(jurisdiction_id.to_string())
            .or_default();
        for n in cvr_contest_names {
            if !names.iter().any(|x| x == n) {
                names.push(n.to_string());
            }
        }
        self
    }

    /// Adds a contest name that does not match any CVR contest name yet.
    pub fn unresolved_standardization(
        self,
        jurisdiction_id: &str,
        contest_name: &str,
        cvr_contest_names: &[&str],
    ) -> SnapshotBuilder {
        self.standardization(jurisdiction_id, contest_name, cvr_contest_names, None)
    }

    pub fn standardized(
        self,
        jurisdiction_id: &str,
        contest_name: &str,
        cvr_contest_name: &str,
    ) -> SnapshotBuilder {
        self.standardization(
            jurisdiction_id,
            contest_name,
            &[cvr_contest_name],
            Some(cvr_contest_name),
        )
    }

    /// Marks the audit as launched up to the given round.
    pub fn round(mut self, round_num: u32) -> SnapshotBuilder {
        self._round = Some(RoundInfo {
            round_num,
            is_audit_complete: false,
        });
        self
    }

    pub fn build(self) -> AuditSnapshot {
        AuditSnapshot {
            settings: self._settings,
            jurisdictions: self._jurisdictions,
            contests: self._contests,
            standardizations: self._standardizations,
            round: self._round,
        }
    }
}
