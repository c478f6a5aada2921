//! Polling of the sample size calculation.
//!
//! Every target contest has its own watch. A watch only requests anything
//! once its preconditions hold: the files of the contest universe are all
//! processed, and for CVR audits every contest name is standardized. The
//! identity of those inputs is kept as a fingerprint. When it changes, a new
//! generation starts and answers addressed to the previous generation are
//! thrown away.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::*;
use crate::standardization::StandardizationReconciler;
use crate::status::uploads_complete;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why the sample size calculation cannot run yet.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum BlockedReason {
    FilesNotUploaded,
    StandardizationIncomplete,
}

impl Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockedReason::FilesNotUploaded => write!(
                f,
                "All jurisdiction files must be uploaded and all audit settings must be configured in order to calculate the sample size."
            ),
            BlockedReason::StandardizationIncomplete => write!(
                f,
                "All contest names must be standardized in order to calculate the sample size."
            ),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Precondition {
    /// `trigger` identifies the inputs of the calculation.
    Met { trigger: String },
    Blocked(BlockedReason),
}

/// The calculation task of one contest, as seen in one response.
#[derive(PartialEq, Debug, Clone)]
pub enum SampleSizeTask {
    Pending,
    InProgress,
    Complete {
        options: Vec<SampleSizeOption>,
        selected: Option<SampleSizeOption>,
    },
    Errored {
        message: String,
    },
}

impl SampleSizeTask {
    pub fn from_response(response: &SampleSizesResponse, contest_id: &str) -> SampleSizeTask {
        match response.task.status {
            TaskStatus::Pending => SampleSizeTask::Pending,
            TaskStatus::InProgress => SampleSizeTask::InProgress,
            TaskStatus::Errored => SampleSizeTask::Errored {
                message: response
                    .task
                    .error
                    .clone()
                    .unwrap_or_else(|| "Sample size calculation failed.".to_string()),
            },
            TaskStatus::Complete => {
                let options = response
                    .sample_sizes
                    .as_ref()
                    .and_then(|m| m.get(contest_id))
                    .cloned();
                if options.is_none() {
                    warn!(
                        "SampleSizeTask::from_response: no options computed for contest {}",
                        contest_id
                    );
                }
                SampleSizeTask::Complete {
                    options: options.unwrap_or_default(),
                    selected: response
                        .selected
                        .as_ref()
                        .and_then(|m| m.get(contest_id))
                        .cloned(),
                }
            }
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub struct PollTicket {
    pub contest_id: String,
    pub generation: u64,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PollRequest {
    pub ticket: PollTicket,
    /// Only the first request of a generation starts the calculation.
    pub recompute: bool,
}

#[derive(PartialEq, Debug, Clone)]
pub enum WatchState {
    Blocked(BlockedReason),
    Loading {
        generation: u64,
    },
    Complete {
        generation: u64,
        options: Vec<SampleSizeOption>,
        selected: Option<SampleSizeOption>,
    },
    /// Terminal. The message comes from the service, untouched.
    Errored {
        generation: u64,
        message: String,
    },
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Acceptance {
    Applied,
    Discarded,
}

#[derive(PartialEq, Debug, Clone)]
struct ContestWatch {
    state: WatchState,
    trigger: Option<String>,
    generation: Option<u64>,
    started: bool,
    in_flight: bool,
}

impl ContestWatch {
    fn blocked(reason: BlockedReason) -> ContestWatch {
        ContestWatch {
            state: WatchState::Blocked(reason),
            trigger: None,
            generation: None,
            started: false,
            in_flight: false,
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct SampleSizeTaskWatcher {
    watches: BTreeMap<String, ContestWatch>,
    next_generation: u64,
    pub interval: Duration,
}

impl Default for SampleSizeTaskWatcher {
    fn default() -> Self {
        SampleSizeTaskWatcher::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Checks whether the sample size of a contest can be calculated.
pub fn precondition(
    snapshot: &AuditSnapshot,
    reconciler: Option<&StandardizationReconciler>,
    contest: &Contest,
) -> Precondition {
    let universe = snapshot.universe(contest);
    if !universe.iter().all(|j| uploads_complete(j)) {
        return Precondition::Blocked(BlockedReason::FilesNotUploaded);
    }
    let standardization_fp = if snapshot.audit_type().uses_cvrs() {
        match reconciler {
            Some(r) if r.is_complete(&snapshot.contests) => r.fingerprint(),
            _ => return Precondition::Blocked(BlockedReason::StandardizationIncomplete),
        }
    } else {
        String::new()
    };

    let mut s = format!("{}\u{1e}{}\u{1e}", contest.id, contest.total_ballots_cast);
    for j in universe.iter() {
        let m = &j.ballot_manifest;
        s.push_str(&format!(
            "{}\u{1f}{:?}\u{1f}{:?}\u{1f}{:?}\u{1f}{:?}\u{1e}",
            j.id, m.num_ballots, m.num_batches, m.num_ballots_cvr, m.num_ballots_non_cvr
        ));
    }
    s.push_str(&standardization_fp);
    // A launch changes what the service reports.
    s.push_str(&format!("\u{1e}{:?}", snapshot.round.as_ref().map(|r| r.round_num)));
    Precondition::Met {
        trigger: sha256::digest(s.as_str()),
    }
}

impl SampleSizeTaskWatcher {
    pub fn new(interval: Duration) -> SampleSizeTaskWatcher {
        SampleSizeTaskWatcher {
            watches: BTreeMap::new(),
            next_generation: 1,
            interval,
        }
    }

    /// Re-evaluates the preconditions of every target contest of a snapshot.
    /// Watches of contests that are no longer targeted are dropped.
    pub fn update(
        &mut self,
        snapshot: &AuditSnapshot,
        reconciler: Option<&StandardizationReconciler>,
    ) {
        let targets = snapshot.target_contests();
        self.watches
            .retain(|cid, _| targets.iter().any(|c| &c.id == cid));
        for contest in targets {
            let p = precondition(snapshot, reconciler, contest);
            self.set_precondition(&contest.id, p);
        }
    }

    pub fn set_precondition(&mut self, contest_id: &str, precondition: Precondition) {
        match precondition {
            Precondition::Blocked(reason) => {
                let watch = self
                    .watches
                    .entry(contest_id.to_string())
                    .or_insert_with(|| ContestWatch::blocked(reason));
                if watch.state != WatchState::Blocked(reason) {
                    debug!(
                        "set_precondition: contest {} blocked: {:?}",
                        contest_id, reason
                    );
                }
                *watch = ContestWatch::blocked(reason);
            }
            Precondition::Met { trigger } => {
                if let Some(watch) = self.watches.get(contest_id) {
                    if watch.trigger.as_ref() == Some(&trigger) {
                        return;
                    }
                }
                let generation = self.next_generation;
                self.next_generation += 1;
                info!(
                    "Sample size calculation for contest {}: starting generation {}",
                    contest_id, generation
                );
                self.watches.insert(
                    contest_id.to_string(),
                    ContestWatch {
                        state: WatchState::Loading { generation },
                        trigger: Some(trigger),
                        generation: Some(generation),
                        started: false,
                        in_flight: false,
                    },
                );
            }
        }
    }

    /// The requests to send on this tick. A contest never has more than one
    /// request in flight.
    pub fn due_requests(&mut self) -> Vec<PollRequest> {
        let mut requests = Vec::new();
        for (contest_id, watch) in self.watches.iter_mut() {
            if let WatchState::Loading { generation } = watch.state {
                if watch.in_flight {
                    continue;
                }
                watch.in_flight = true;
                requests.push(PollRequest {
                    ticket: PollTicket {
                        contest_id: contest_id.clone(),
                        generation,
                    },
                    recompute: !watch.started,
                });
            }
        }
        debug!("due_requests: {:?}", requests);
        requests
    }

    fn current_watch(&mut self, ticket: &PollTicket) -> Option<&mut ContestWatch> {
        match self.watches.get_mut(&ticket.contest_id) {
            Some(watch) if watch.generation == Some(ticket.generation) => Some(watch),
            _ => None,
        }
    }

    /// Applies an answer. Answers for a superseded generation are discarded.
    pub fn accept(&mut self, ticket: &PollTicket, task: SampleSizeTask) -> Acceptance {
        let watch = match self.current_watch(ticket) {
            Some(watch) => watch,
            None => {
                warn!(
                    "Discarding stale sample size response for contest {} (generation {})",
                    ticket.contest_id, ticket.generation
                );
                return Acceptance::Discarded;
            }
        };
        let generation = ticket.generation;
        watch.in_flight = false;
        watch.started = true;
        watch.state = match task {
            SampleSizeTask::Pending | SampleSizeTask::InProgress => {
                WatchState::Loading { generation }
            }
            SampleSizeTask::Complete { options, selected } => {
                info!(
                    "Sample size options for contest {}: {} option(s)",
                    ticket.contest_id,
                    options.len()
                );
                WatchState::Complete {
                    generation,
                    options,
                    selected,
                }
            }
            SampleSizeTask::Errored { message } => {
                warn!(
                    "Sample size calculation for contest {} failed: {}",
                    ticket.contest_id, message
                );
                WatchState::Errored {
                    generation,
                    message,
                }
            }
        };
        Acceptance::Applied
    }

    /// Gives up on a request that never got an answer, so that the next tick
    /// asks again.
    pub fn release(&mut self, ticket: &PollTicket) {
        if let Some(watch) = self.current_watch(ticket) {
            watch.in_flight = false;
        }
    }

    pub fn state(&self, contest_id: &str) -> Option<&WatchState> {
        self.watches.get(contest_id).map(|w| &w.state)
    }

    /// True while some contest still waits for its options.
    pub fn is_loading(&self) -> bool {
        self.watches
            .values()
            .any(|w| matches!(w.state, WatchState::Loading { .. }))
    }

    /// The options of every contest whose calculation completed.
    pub fn completed(&self) -> BTreeMap<&str, (&[SampleSizeOption], Option<&SampleSizeOption>)> {
        self.watches
            .iter()
            .filter_map(|(cid, w)| match &w.state {
                WatchState::Complete {
                    options, selected, ..
                } => Some((cid.as_str(), (options.as_slice(), selected.as_ref()))),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(size: u64) -> SampleSizeTask {
        SampleSizeTask::Complete {
            options: vec![SampleSizeOption::named("asn", size, Some(0.54))],
            selected: None,
        }
    }

    fn met(trigger: &str) -> Precondition {
        Precondition::Met {
            trigger: trigger.to_string(),
        }
    }

    #[test]
    fn blocked_contest_is_not_polled() {
        let mut w = SampleSizeTaskWatcher::default();
        w.set_precondition("c1", Precondition::Blocked(BlockedReason::FilesNotUploaded));
        assert!(w.due_requests().is_empty());
        assert_eq!(
            w.state("c1"),
            Some(&WatchState::Blocked(BlockedReason::FilesNotUploaded))
        );
    }

    #[test]
    fn calculation_starts_once_then_polls() {
        let mut w = SampleSizeTaskWatcher::default();
        w.set_precondition("c1", met("a"));
        let reqs = w.due_requests();
        assert_eq!(reqs.len(), 1);
        assert!(reqs[0].recompute);
        // Already in flight: nothing new.
        assert!(w.due_requests().is_empty());
        assert_eq!(
            w.accept(&reqs[0].ticket, SampleSizeTask::InProgress),
            Acceptance::Applied
        );
        // Same inputs: no new generation.
        w.set_precondition("c1", met("a"));
        let reqs2 = w.due_requests();
        assert_eq!(reqs2.len(), 1);
        assert!(!reqs2[0].recompute);
        assert_eq!(reqs2[0].ticket, reqs[0].ticket);
        w.accept(&reqs2[0].ticket, complete(20));
        assert!(!w.is_loading());
        assert!(w.due_requests().is_empty());
        assert_eq!(w.completed().len(), 1);
    }

    #[test]
    fn stale_response_is_discarded() {
        let mut w = SampleSizeTaskWatcher::default();
        w.set_precondition("c1", met("a"));
        let old = w.due_requests().remove(0);
        // Standardizations changed while the request was in flight.
        w.set_precondition("c1", met("b"));
        let new = w.due_requests().remove(0);
        assert!(new.recompute);
        assert_ne!(old.ticket, new.ticket);
        assert_eq!(w.accept(&old.ticket, complete(99)), Acceptance::Discarded);
        assert!(w.is_loading());
        assert_eq!(w.accept(&new.ticket, complete(20)), Acceptance::Applied);
        match w.state("c1") {
            Some(WatchState::Complete { options, .. }) => assert_eq!(options[0].total(), 20),
            s => panic!("unexpected state {:?}", s),
        }
    }

    #[test]
    fn blocking_abandons_in_flight_request() {
        let mut w = SampleSizeTaskWatcher::default();
        w.set_precondition("c1", met("a"));
        let req = w.due_requests().remove(0);
        w.set_precondition(
            "c1",
            Precondition::Blocked(BlockedReason::StandardizationIncomplete),
        );
        assert_eq!(w.accept(&req.ticket, complete(20)), Acceptance::Discarded);
        w.set_precondition("c1", met("a"));
        let req2 = w.due_requests().remove(0);
        assert!(req2.recompute);
        assert!(req2.ticket.generation > req.ticket.generation);
    }

    #[test]
    fn errors_are_terminal_and_verbatim() {
        let mut w = SampleSizeTaskWatcher::default();
        w.set_precondition("c1", met("a"));
        let req = w.due_requests().remove(0);
        w.accept(
            &req.ticket,
            SampleSizeTask::Errored {
                message: "sample sizes error".to_string(),
            },
        );
        assert!(w.due_requests().is_empty());
        assert_eq!(
            w.state("c1"),
            Some(&WatchState::Errored {
                generation: req.ticket.generation,
                message: "sample sizes error".to_string()
            })
        );
    }

    #[test]
    fn released_request_is_sent_again() {
        let mut w = SampleSizeTaskWatcher::default();
        w.set_precondition("c1", met("a"));
        let req = w.due_requests().remove(0);
        w.release(&req.ticket);
        let again = w.due_requests().remove(0);
        assert_eq!(again.ticket, req.ticket);
        assert!(again.recompute);
    }

    #[test]
    fn task_is_split_per_contest() {
        let response: SampleSizesResponse = serde_json::from_value(serde_json::json!({
            "sampleSizes": {"contest-id": [{"key": "asn", "size": 20, "prob": 0.54}]},
            "selected": null,
            "task": {"status": "PROCESSED", "error": null, "startedAt": null, "completedAt": null}
        }))
        .unwrap();
        assert_eq!(SampleSizeTask::from_response(&response, "contest-id"), complete(20));
        assert_eq!(
            SampleSizeTask::from_response(&response, "other"),
            SampleSizeTask::Complete {
                options: vec![],
                selected: None
            }
        );
    }
}
