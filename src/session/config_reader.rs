use crate::session::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

use audit_launch::preview::SamplePreview;

/// One action of the audit administrator, replayed in order.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "selectOption")]
    SelectOption {
        #[serde(rename = "contestId")]
        contest_id: String,
        key: String,
    },
    #[serde(rename = "selectCustom")]
    SelectCustom {
        #[serde(rename = "contestId")]
        contest_id: String,
    },
    #[serde(rename = "customSize")]
    CustomSize {
        #[serde(rename = "contestId")]
        contest_id: String,
        value: String,
    },
    #[serde(rename = "customSplit")]
    CustomSplit {
        #[serde(rename = "contestId")]
        contest_id: String,
        cvr: String,
        #[serde(rename = "nonCvr")]
        non_cvr: String,
    },
    #[serde(rename = "standardize")]
    Standardize {
        standardizations: StandardizationUpdate,
    },
    #[serde(rename = "previewSample")]
    PreviewSample {},
    #[serde(rename = "launch")]
    Launch {},
}

/// A recorded review session: the state of the audit as the service
/// reported it, the answers of the background tasks, and the actions taken.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    #[serde(rename = "auditId")]
    pub audit_id: String,
    pub settings: AuditSettings,
    pub jurisdictions: Vec<Jurisdiction>,
    pub contests: Vec<Contest>,
    pub standardizations: Option<ContestNameStandardizations>,
    pub round: Option<RoundInfo>,
    /// Successive answers of the sample size calculation. The last one is
    /// repeated once the list runs out.
    #[serde(rename = "sampleSizeResponses", default)]
    pub sample_size_responses: Vec<SampleSizesResponse>,
    #[serde(rename = "samplePreviewResponses", default)]
    pub sample_preview_responses: Vec<SamplePreview>,
    #[serde(default)]
    pub events: Vec<SessionEvent>,
    #[serde(rename = "pollIntervalMs")]
    pub poll_interval_ms: Option<u64>,
    #[serde(rename = "maxTicks")]
    pub max_ticks: Option<usize>,
}

impl SessionFile {
    pub fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            settings: self.settings.clone(),
            jurisdictions: self.jurisdictions.clone(),
            contests: self.contests.clone(),
            standardizations: self.standardizations.clone(),
            round: self.round.clone(),
        }
    }
}

pub fn read_session(path: &str) -> SessionResult<SessionFile> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let session: SessionFile =
        serde_json::from_str(&contents).context(ParsingJsonSnafu { path })?;
    debug!(
        "read_session: {}: {} event(s), {} sample size response(s)",
        path,
        session.events.len(),
        session.sample_size_responses.len()
    );
    Ok(session)
}

pub fn read_reference(path: &str) -> SessionResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(&contents).context(ParsingJsonSnafu { path })?;
    Ok(js)
}
