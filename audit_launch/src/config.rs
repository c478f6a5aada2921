// ********* Input data structures ***********

// The shapes below follow the JSON documents exchanged with the audit service.
// Field names on the wire are camelCase.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The statistical method used by an audit.
///
/// It decides which files each jurisdiction has to upload, what the sampled
/// unit is, and how a full hand tally is treated.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum AuditType {
    #[serde(rename = "BALLOT_POLLING")]
    BallotPolling,
    #[serde(rename = "BATCH_COMPARISON")]
    BatchComparison,
    #[serde(rename = "BALLOT_COMPARISON")]
    BallotComparison,
    #[serde(rename = "HYBRID")]
    Hybrid,
}

impl AuditType {
    /// Audit types that require cast vote records, and therefore contest name
    /// standardization.
    pub fn uses_cvrs(self) -> bool {
        matches!(self, AuditType::BallotComparison | AuditType::Hybrid)
    }

    pub fn sample_unit(self) -> SampleUnit {
        match self {
            AuditType::BatchComparison => SampleUnit::Batches,
            AuditType::BallotPolling | AuditType::BallotComparison | AuditType::Hybrid => {
                SampleUnit::Ballots
            }
        }
    }
}

impl Display for AuditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditType::BallotPolling => "Ballot Polling",
            AuditType::BatchComparison => "Batch Comparison",
            AuditType::BallotComparison => "Ballot Comparison",
            AuditType::Hybrid => "Hybrid",
        };
        write!(f, "{}", s)
    }
}

/// What gets drawn in a sample.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum SampleUnit {
    Ballots,
    Batches,
}

impl Display for SampleUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleUnit::Ballots => write!(f, "ballots"),
            SampleUnit::Batches => write!(f, "batches"),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(rename = "auditName")]
    pub audit_name: String,
    #[serde(rename = "auditType")]
    pub audit_type: AuditType,
    #[serde(rename = "riskLimit")]
    pub risk_limit: Option<u32>,
    #[serde(rename = "randomSeed")]
    pub random_seed: Option<String>,
    pub state: Option<String>,
}

/// Processing state of an uploaded file.
///
/// The service historically reports `READY_TO_PROCESS` and `PROCESSING`; the
/// shorter names are accepted as well.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum FileProcessingStatus {
    #[serde(rename = "READY_TO_PROCESS", alias = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "PROCESSING", alias = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "PROCESSED")]
    Processed,
    #[serde(rename = "ERRORED")]
    Errored,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FileProcessing {
    pub status: FileProcessingStatus,
    pub error: Option<String>,
}

/// One uploaded file of a jurisdiction (manifest, batch tallies or CVRs).
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSlot {
    /// Absent until something has been uploaded.
    pub processing: Option<FileProcessing>,
    #[serde(rename = "numBallots")]
    pub num_ballots: Option<u64>,
    #[serde(rename = "numBatches")]
    pub num_batches: Option<u64>,
    #[serde(rename = "numBallotsCvr")]
    pub num_ballots_cvr: Option<u64>,
    #[serde(rename = "numBallotsNonCvr")]
    pub num_ballots_non_cvr: Option<u64>,
}

impl FileSlot {
    pub fn status(&self) -> FileProcessingStatus {
        self.processing
            .as_ref()
            .map(|p| p.status)
            .unwrap_or(FileProcessingStatus::NotStarted)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum RoundStatus {
    #[serde(rename = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETE")]
    Complete,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionRoundStatus {
    pub status: RoundStatus,
    #[serde(rename = "numSamples", default)]
    pub num_samples: u64,
    #[serde(rename = "numUnique", default)]
    pub num_unique: u64,
    #[serde(rename = "numSamplesAudited", default)]
    pub num_samples_audited: u64,
    #[serde(rename = "numUniqueAudited", default)]
    pub num_unique_audited: u64,
    #[serde(rename = "numDiscrepancies")]
    pub num_discrepancies: Option<u64>,
}

impl JurisdictionRoundStatus {
    /// Samples left to audit, counting either unique ballots or all draws.
    pub fn remaining(&self, unique: bool) -> u64 {
        if unique {
            self.num_unique.saturating_sub(self.num_unique_audited)
        } else {
            self.num_samples.saturating_sub(self.num_samples_audited)
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub id: String,
    pub name: String,
    #[serde(rename = "ballotManifest")]
    pub ballot_manifest: FileSlot,
    #[serde(rename = "batchTallies")]
    pub batch_tallies: Option<FileSlot>,
    pub cvrs: Option<FileSlot>,
    #[serde(rename = "currentRoundStatus")]
    pub current_round_status: Option<JurisdictionRoundStatus>,
}

impl Jurisdiction {
    /// The files this jurisdiction must upload. The manifest is always
    /// required, the other slots only when present.
    pub fn required_files(&self) -> Vec<&FileSlot> {
        let mut files = vec![&self.ballot_manifest];
        if let Some(tallies) = &self.batch_tallies {
            files.push(tallies);
        }
        if let Some(cvrs) = &self.cvrs {
            files.push(cvrs);
        }
        files
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ContestChoice {
    pub id: String,
    pub name: String,
    #[serde(rename = "numVotes")]
    pub num_votes: u64,
    #[serde(rename = "numVotesCvr")]
    pub num_votes_cvr: Option<u64>,
    #[serde(rename = "numVotesNonCvr")]
    pub num_votes_non_cvr: Option<u64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum ContestKind {
    Target,
    Opportunistic,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
    pub id: String,
    pub name: String,
    #[serde(rename = "isTargeted")]
    pub is_targeted: bool,
    #[serde(default)]
    pub choices: Vec<ContestChoice>,
    #[serde(rename = "numWinners")]
    pub num_winners: u32,
    #[serde(rename = "votesAllowed")]
    pub votes_allowed: u32,
    #[serde(rename = "totalBallotsCast")]
    pub total_ballots_cast: u64,
    /// The contest universe: jurisdictions that report on this contest.
    #[serde(rename = "jurisdictionIds", default)]
    pub jurisdiction_ids: Vec<String>,
}

impl Contest {
    pub fn kind(&self) -> ContestKind {
        if self.is_targeted {
            ContestKind::Target
        } else {
            ContestKind::Opportunistic
        }
    }

    pub fn in_universe(&self, jurisdiction_id: &str) -> bool {
        self.jurisdiction_ids.iter().any(|j| j == jurisdiction_id)
    }
}

/// Contest name mappings as reported by the service.
///
/// `standardizations[jurisdiction][contest name]` is the CVR contest name
/// chosen for it, or null while unresolved.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContestNameStandardizations {
    #[serde(default)]
    pub standardizations: BTreeMap<String, BTreeMap<String, Option<String>>>,
    #[serde(rename = "cvrContestNames", default)]
    pub cvr_contest_names: BTreeMap<String, Vec<String>>,
}

/// A partial set of resolutions, keyed like
/// [`ContestNameStandardizations::standardizations`].
pub type StandardizationUpdate = BTreeMap<String, BTreeMap<String, Option<String>>>;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoundInfo {
    #[serde(rename = "roundNum")]
    pub round_num: u32,
    #[serde(rename = "isAuditComplete", default)]
    pub is_audit_complete: bool,
}

// ******** Sample sizes *********

/// The identifier of a sample size option.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub enum OptionKey {
    /// A key provided by the sample size calculation (`asn`, `0.7`, ...).
    Named(String),
    /// A size typed in by the audit administrator.
    Custom,
}

impl OptionKey {
    pub const CUSTOM: &'static str = "custom";
    /// The BRAVO average sample number, for ballot polling audits.
    pub const ASN: &'static str = "asn";

    pub fn parse(key: &str) -> OptionKey {
        if key == OptionKey::CUSTOM {
            OptionKey::Custom
        } else {
            OptionKey::Named(key.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OptionKey::Named(k) => k.as_str(),
            OptionKey::Custom => OptionKey::CUSTOM,
        }
    }
}

impl Display for OptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum SampleSize {
    Total(u64),
    /// Hybrid audits sample CVR and non-CVR ballots separately.
    Split { cvr: u64, non_cvr: u64 },
}

impl SampleSize {
    pub fn total(&self) -> u64 {
        match self {
            SampleSize::Total(size) => *size,
            SampleSize::Split { cvr, non_cvr } => cvr.saturating_add(*non_cvr),
        }
    }
}

/// A sample size candidate, either computed or entered by hand.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SampleSizeOptionWire", into = "SampleSizeOptionWire")]
pub struct SampleSizeOption {
    pub key: OptionKey,
    pub size: SampleSize,
    /// Probability of completing the audit in one round, when known.
    pub prob: Option<f64>,
}

impl SampleSizeOption {
    pub fn named(key: &str, size: u64, prob: Option<f64>) -> SampleSizeOption {
        SampleSizeOption {
            key: OptionKey::parse(key),
            size: SampleSize::Total(size),
            prob,
        }
    }

    pub fn custom(size: u64) -> SampleSizeOption {
        SampleSizeOption {
            key: OptionKey::Custom,
            size: SampleSize::Total(size),
            prob: None,
        }
    }

    pub fn custom_split(cvr: u64, non_cvr: u64) -> SampleSizeOption {
        SampleSizeOption {
            key: OptionKey::Custom,
            size: SampleSize::Split { cvr, non_cvr },
            prob: None,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.key == OptionKey::Custom
    }

    pub fn total(&self) -> u64 {
        self.size.total()
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct SampleSizeOptionWire {
    key: String,
    size: u64,
    #[serde(default)]
    prob: Option<f64>,
    #[serde(rename = "sizeCvr", default, skip_serializing_if = "Option::is_none")]
    size_cvr: Option<u64>,
    #[serde(rename = "sizeNonCvr", default, skip_serializing_if = "Option::is_none")]
    size_non_cvr: Option<u64>,
}

impl TryFrom<SampleSizeOptionWire> for SampleSizeOption {
    type Error = String;

    fn try_from(wire: SampleSizeOptionWire) -> Result<Self, Self::Error> {
        let size = match (wire.size_cvr, wire.size_non_cvr) {
            (None, None) => SampleSize::Total(wire.size),
            (Some(cvr), Some(non_cvr)) if cvr.checked_add(non_cvr) == Some(wire.size) => {
                SampleSize::Split { cvr, non_cvr }
            }
            (Some(cvr), Some(non_cvr)) => {
                return Err(format!(
                    "sample size {} for option {} does not equal sizeCvr {} + sizeNonCvr {}",
                    wire.size, wire.key, cvr, non_cvr
                ));
            }
            _ => {
                return Err(format!(
                    "option {}: sizeCvr and sizeNonCvr must be provided together",
                    wire.key
                ));
            }
        };
        Ok(SampleSizeOption {
            key: OptionKey::parse(&wire.key),
            size,
            prob: wire.prob,
        })
    }
}

impl From<SampleSizeOption> for SampleSizeOptionWire {
    fn from(option: SampleSizeOption) -> Self {
        let (size_cvr, size_non_cvr) = match option.size {
            SampleSize::Total(_) => (None, None),
            SampleSize::Split { cvr, non_cvr } => (Some(cvr), Some(non_cvr)),
        };
        SampleSizeOptionWire {
            key: option.key.as_str().to_string(),
            size: option.size.total(),
            prob: option.prob,
            size_cvr,
            size_non_cvr,
        }
    }
}

/// The chosen sample size of every target contest, keyed by contest id.
///
/// This is the payload of the round launch.
pub type SampleSizeMap = BTreeMap<String, SampleSizeOption>;

/// State of a background task run by the service.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "READY_TO_PROCESS", alias = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING", alias = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "PROCESSED", alias = "COMPLETE")]
    Complete,
    #[serde(rename = "ERRORED")]
    Errored,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub status: TaskStatus,
    pub error: Option<String>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<String>,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<String>,
}

impl TaskInfo {
    pub fn with_status(status: TaskStatus) -> TaskInfo {
        TaskInfo {
            status,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Response of the sample size calculation endpoint.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SampleSizesResponse {
    #[serde(rename = "sampleSizes")]
    pub sample_sizes: Option<BTreeMap<String, Vec<SampleSizeOption>>>,
    /// The selections recorded when the round was launched.
    pub selected: Option<SampleSizeMap>,
    pub task: TaskInfo,
}

// ********* Audit snapshot **********

/// Everything the launch decision is computed from, fetched together.
///
/// A snapshot is never edited in place: a refresh replaces it as a whole.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AuditSnapshot {
    pub settings: AuditSettings,
    pub jurisdictions: Vec<Jurisdiction>,
    pub contests: Vec<Contest>,
    pub standardizations: Option<ContestNameStandardizations>,
    /// The most recently launched round, if any.
    pub round: Option<RoundInfo>,
}

impl AuditSnapshot {
    pub fn audit_type(&self) -> AuditType {
        self.settings.audit_type
    }

    /// Once a round has been launched, the review is read-only.
    pub fn is_locked(&self) -> bool {
        self.round.is_some()
    }

    pub fn next_round_num(&self) -> u32 {
        self.round.as_ref().map(|r| r.round_num + 1).unwrap_or(1)
    }

    pub fn contest(&self, contest_id: &str) -> Option<&Contest> {
        self.contests.iter().find(|c| c.id == contest_id)
    }

    /// Target contests, in input order.
    pub fn target_contests(&self) -> Vec<&Contest> {
        self.contests
            .iter()
            .filter(|c| c.kind() == ContestKind::Target)
            .collect()
    }

    /// The jurisdictions of a contest universe, in input order.
    pub fn universe(&self, contest: &Contest) -> Vec<&Jurisdiction> {
        self.jurisdictions
            .iter()
            .filter(|j| contest.in_universe(&j.id))
            .collect()
    }
}
