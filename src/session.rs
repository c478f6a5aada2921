use log::{debug, info, warn};

use audit_launch::full_hand_tally::{FullHandTallyVerdict, FULL_HAND_TALLY_HEADLINE};
use audit_launch::launch::RoundRequest;
use audit_launch::preview::{totals, PreviewState, SamplePreview, DRAWING_MESSAGE};
use audit_launch::review::{AuditReview, ReviewConfig};
use audit_launch::selector::{CustomEntry, Selection};
use audit_launch::service::{AuditService, SampleSizeRequest};
use audit_launch::standardization::StandardizationStatus;
use audit_launch::status::{count_complete, jurisdiction_status, sort_by_rank, status_label};
use audit_launch::task_watcher::WatchState;
use audit_launch::*;
use snafu::{prelude::*, Snafu};

use std::collections::VecDeque;
use std::fs;
use std::time::Duration;

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;

pub mod config_reader;

use crate::session::config_reader::*;

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON content of {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error writing the report to {path}"))]
    WritingReport {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error serializing the report"))]
    SerializingReport { source: serde_json::Error },
    #[snafu(display("Review failed: {source}"))]
    Review { source: AuditError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

// ********* Replay of recorded responses ***********

#[derive(Debug, Snafu)]
pub enum ReplayError {
    #[snafu(display("The session does not contain any {what} response"))]
    NoRecordedResponse { what: String },
}

/// Serves the responses recorded in a session file.
///
/// Background task answers are handed out in order, the last one repeating.
/// Writes are recorded and reflected in later reads.
pub struct ReplayService {
    snapshot: AuditSnapshot,
    sample_sizes: VecDeque<SampleSizesResponse>,
    previews: VecDeque<SamplePreview>,
    pub rounds: Vec<RoundRequest>,
    pub sample_size_requests: Vec<SampleSizeRequest>,
}

fn next_response<T: Clone>(queue: &mut VecDeque<T>, what: &str) -> Result<T, ReplayError> {
    let response = queue
        .pop_front()
        .context(NoRecordedResponseSnafu { what })?;
    if queue.is_empty() {
        queue.push_back(response.clone());
    }
    Ok(response)
}

impl ReplayService {
    pub fn new(session: &SessionFile) -> ReplayService {
        ReplayService {
            snapshot: session.snapshot(),
            sample_sizes: session.sample_size_responses.iter().cloned().collect(),
            previews: session.sample_preview_responses.iter().cloned().collect(),
            rounds: Vec::new(),
            sample_size_requests: Vec::new(),
        }
    }
}

impl AuditService for ReplayService {
    type Error = ReplayError;

    fn get_settings(&mut self) -> Result<AuditSettings, ReplayError> {
        Ok(self.snapshot.settings.clone())
    }

    fn get_jurisdictions(&mut self) -> Result<Vec<Jurisdiction>, ReplayError> {
        Ok(self.snapshot.jurisdictions.clone())
    }

    fn get_contests(&mut self) -> Result<Vec<Contest>, ReplayError> {
        Ok(self.snapshot.contests.clone())
    }

    fn get_round(&mut self) -> Result<Option<RoundInfo>, ReplayError> {
        Ok(self.snapshot.round.clone())
    }

    fn get_standardizations(&mut self) -> Result<ContestNameStandardizations, ReplayError> {
        Ok(self.snapshot.standardizations.clone().unwrap_or_default())
    }

    fn put_standardizations(&mut self, update: &StandardizationUpdate) -> Result<(), ReplayError> {
        let s = self
            .snapshot
            .standardizations
            .get_or_insert_with(Default::default);
        s.standardizations = update.clone();
        Ok(())
    }

    fn get_sample_size_options(
        &mut self,
        request: SampleSizeRequest,
    ) -> Result<SampleSizesResponse, ReplayError> {
        debug!("get_sample_size_options: {:?}", request);
        self.sample_size_requests.push(request);
        next_response(&mut self.sample_sizes, "sample size")
    }

    fn start_next_round(&mut self, request: &RoundRequest) -> Result<(), ReplayError> {
        self.rounds.push(request.clone());
        self.snapshot.round = Some(RoundInfo {
            round_num: request.round_num,
            is_audit_complete: false,
        });
        for response in self.sample_sizes.iter_mut() {
            response.selected = Some(request.sample_sizes.clone());
        }
        Ok(())
    }

    fn post_compute_sample_preview(&mut self, sizes: &SampleSizeMap) -> Result<(), ReplayError> {
        debug!("post_compute_sample_preview: {:?}", sizes);
        Ok(())
    }

    fn get_sample_preview(&mut self) -> Result<SamplePreview, ReplayError> {
        next_response(&mut self.previews, "sample preview")
    }
}

// ********* Session run ***********

fn apply_event(
    review: &mut AuditReview,
    service: &mut ReplayService,
    event: &SessionEvent,
) -> AuditResult<()> {
    info!("Event: {:?}", event);
    match event {
        SessionEvent::SelectOption { contest_id, key } => review.select_option(contest_id, key),
        SessionEvent::SelectCustom { contest_id } => review.select_custom(contest_id),
        SessionEvent::CustomSize { contest_id, value } => review.edit_custom(contest_id, value),
        SessionEvent::CustomSplit {
            contest_id,
            cvr,
            non_cvr,
        } => review.edit_custom_split(contest_id, cvr, non_cvr),
        SessionEvent::Standardize { standardizations } => {
            review.submit_standardizations(service, standardizations)
        }
        SessionEvent::PreviewSample {} => review.preview_sample().map(|_| ()),
        SessionEvent::Launch {} => review.launch(service).map(|_| ()),
    }
}

fn selection_js(selection: &Selection) -> JSValue {
    match selection {
        Selection::Option(key) => json!({ "key": key }),
        Selection::Custom(CustomEntry::Total(value)) => {
            json!({"key": OptionKey::CUSTOM, "value": value})
        }
        Selection::Custom(CustomEntry::Split { cvr, non_cvr }) => {
            json!({"key": OptionKey::CUSTOM, "cvr": cvr, "nonCvr": non_cvr})
        }
    }
}

fn task_js(task: &Option<WatchState>) -> JSValue {
    match task {
        None => json!({"status": "notStarted", "message": null}),
        Some(WatchState::Blocked(reason)) => {
            json!({"status": "blocked", "message": reason.to_string()})
        }
        Some(WatchState::Loading { .. }) => {
            json!({"status": "loading", "message": LOADING_MESSAGE})
        }
        Some(WatchState::Complete { .. }) => json!({"status": "complete", "message": null}),
        Some(WatchState::Errored { message, .. }) => {
            json!({"status": "errored", "message": message})
        }
    }
}

fn full_hand_tally_js(verdict: &Option<FullHandTallyVerdict>) -> JSValue {
    match verdict {
        None => JSValue::Null,
        Some(FullHandTallyVerdict::NotFullHandTally) => json!({"verdict": "none", "message": null}),
        Some(FullHandTallyVerdict::NotApplicable) => {
            json!({"verdict": "notApplicable", "message": null})
        }
        Some(FullHandTallyVerdict::Warning) => {
            json!({"verdict": "warning", "message": FULL_HAND_TALLY_HEADLINE})
        }
        Some(FullHandTallyVerdict::Error(e)) => {
            json!({"verdict": "error", "message": FULL_HAND_TALLY_HEADLINE, "detail": e.to_string()})
        }
    }
}

fn preview_js(state: &PreviewState) -> JSValue {
    match state {
        PreviewState::Idle => json!({"status": "idle"}),
        PreviewState::Drawing => json!({"status": "drawing", "message": DRAWING_MESSAGE}),
        PreviewState::Ready(rows) => {
            let (num_samples, num_unique) = totals(rows);
            json!({
                "status": "ready",
                "jurisdictions": rows,
                "totals": {"numSamples": num_samples, "numUnique": num_unique}
            })
        }
        PreviewState::Errored(message) => json!({"status": "errored", "message": message}),
    }
}

fn build_report(session: &SessionFile, review: &AuditReview, event_errors: &[JSValue]) -> JSValue {
    let snapshot = review.snapshot();
    let audit_type = snapshot.audit_type();
    let readiness = review.readiness();

    let (complete, total) = count_complete(&snapshot.jurisdictions);
    let jurisdictions: Vec<JSValue> = sort_by_rank(&snapshot.jurisdictions)
        .iter()
        .map(|j| {
            json!({
                "id": j.id,
                "name": j.name,
                "status": format!("{:?}", jurisdiction_status(j)),
                "label": status_label(audit_type, j),
            })
        })
        .collect();

    let standardization = match review.reconciler() {
        None if audit_type.uses_cvrs() => json!({"status": "Unavailable", "message": null, "unresolved": []}),
        None => json!({"status": "NotApplicable", "message": null, "unresolved": []}),
        Some(r) => {
            let status = r.status(audit_type, &snapshot.contests);
            let unresolved: Vec<JSValue> = match &status {
                StandardizationStatus::Incomplete(pairs) => pairs
                    .iter()
                    .map(|p| {
                        json!({
                            "jurisdictionId": p.jurisdiction_id,
                            "contestName": p.contest_name,
                            "cvrContestNames": p.cvr_contest_names,
                        })
                    })
                    .collect(),
                _ => Vec::new(),
            };
            let label = match &status {
                StandardizationStatus::NotApplicable => "NotApplicable",
                StandardizationStatus::Incomplete(_) => "Incomplete",
                StandardizationStatus::Complete => "Complete",
            };
            json!({"status": label, "message": status.message(), "unresolved": unresolved})
        }
    };

    let contests: Vec<JSValue> = review
        .contest_reviews()
        .iter()
        .map(|c| {
            let options: Vec<JSValue> = c
                .options
                .iter()
                .map(|o| json!({"key": o.key, "label": o.label}))
                .collect();
            json!({
                "id": c.contest_id,
                "name": c.contest_name,
                "limit": c.limits.total,
                "unit": c.limits.unit.to_string(),
                "task": task_js(&c.task),
                "options": options,
                "selection": c.selection.as_ref().map(selection_js),
                "validation": c.validation.as_ref().map(|e| e.to_string()),
                "fullHandTally": full_hand_tally_js(&c.full_hand_tally),
            })
        })
        .collect();

    json!({
        "audit": {
            "auditId": session.audit_id,
            "auditName": snapshot.settings.audit_name,
            "auditType": audit_type,
            "nextRound": snapshot.next_round_num(),
        },
        "readiness": {
            "ready": readiness.ready,
            "reason": readiness.reason.as_ref().map(|r| r.to_string()),
        },
        "jurisdictions": {
            "complete": complete,
            "total": total,
            "list": jurisdictions,
        },
        "standardization": standardization,
        "contests": contests,
        "preview": preview_js(review.preview().state()),
        "launched": review.launched(),
        "eventErrors": event_errors,
    })
}

fn review_config(args: &Args, session: &SessionFile) -> ReviewConfig {
    let mut config = ReviewConfig::DEFAULT;
    // Recorded responses need no pacing unless asked for.
    let interval_ms = args.poll_interval_ms.or(session.poll_interval_ms).unwrap_or(0);
    config.poll_interval = Duration::from_millis(interval_ms);
    if let Some(max_ticks) = args.max_ticks.or(session.max_ticks) {
        config.max_ticks = max_ticks;
    }
    config
}

/// Replays a session and returns the report.
pub fn replay_session(session: &SessionFile, config: ReviewConfig) -> SessionResult<JSValue> {
    let mut service = ReplayService::new(session);
    let mut review = AuditReview::load(&mut service, config).context(ReviewSnafu {})?;
    let mut wait = |d: Duration| {
        if !d.is_zero() {
            std::thread::sleep(d)
        }
    };
    review
        .drive(&mut service, &mut wait)
        .context(ReviewSnafu {})?;

    let mut event_errors: Vec<JSValue> = Vec::new();
    for (idx, event) in session.events.iter().enumerate() {
        match apply_event(&mut review, &mut service, event) {
            Ok(()) => {}
            Err(e @ AuditError::Service { .. }) => return Err(e).context(ReviewSnafu {}),
            Err(e) => {
                warn!("Event {} was rejected: {}", idx, e);
                event_errors.push(json!({"event": idx, "message": e.to_string()}));
            }
        }
        review
            .drive(&mut service, &mut wait)
            .context(ReviewSnafu {})?;
    }
    info!(
        "Session replayed: {} sample size request(s), {} launch(es)",
        service.sample_size_requests.len(),
        service.rounds.len()
    );
    Ok(build_report(session, &review, &event_errors))
}

pub fn run_session(args: &Args) -> SessionResult<()> {
    let session_path = match args.session.clone().or_else(|| args.input.clone()) {
        Some(p) => p,
        None => whatever!("No session file given, use --session"),
    };
    let session = read_session(&session_path)?;
    info!(
        "Session {}: audit {} ({})",
        session_path, session.settings.audit_name, session.settings.audit_type
    );

    let report = replay_session(&session, review_config(args, &session))?;
    let pretty_js_report = serde_json::to_string_pretty(&report).context(SerializingReportSnafu {})?;

    match args.out.as_deref() {
        None | Some("stdout") | Some("") => println!("{}", pretty_js_report),
        Some(path) => {
            fs::write(path, &pretty_js_report).context(WritingReportSnafu { path })?;
            info!("Report written to {}", path);
        }
    }

    // The reference report, if provided for comparison
    if let Some(reference_p) = &args.reference {
        let reference = read_reference(reference_p)?;
        let pretty_js_reference =
            serde_json::to_string_pretty(&reference).context(SerializingReportSnafu {})?;
        if pretty_js_reference != pretty_js_report {
            warn!("Found differences with the reference report");
            print_diff(
                pretty_js_reference.as_str(),
                pretty_js_report.as_ref(),
                "\n",
            );
            whatever!("Difference detected between the session report and the reference report")
        }
    }
    Ok(())
}
