//! A review session: the audit as fetched from the service, plus everything
//! the audit administrator did since.

use std::time::Duration;

use log::{debug, info, warn};
use snafu::{ensure, ResultExt};

use crate::config::*;
use crate::error::*;
use crate::launch::{validate_round_request, RoundRequest};
use crate::preview::{PreviewTicket, SamplePreviewWatcher};
use crate::selector::SampleSizeSelector;
use crate::service::{AuditService, SampleSizeRequest};
use crate::standardization::StandardizationReconciler;
use crate::task_watcher::{SampleSizeTask, SampleSizeTaskWatcher, DEFAULT_POLL_INTERVAL};
use crate::{evaluate_launch_readiness, review_contests, ContestReview, LaunchReadiness};

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct ReviewConfig {
    pub poll_interval: Duration,
    /// Upper bound on the number of polling ticks of [`AuditReview::drive`].
    pub max_ticks: usize,
}

impl ReviewConfig {
    pub const DEFAULT: ReviewConfig = ReviewConfig {
        poll_interval: DEFAULT_POLL_INTERVAL,
        max_ticks: 600,
    };
}

fn call<T, E>(operation: &str, res: Result<T, E>) -> AuditResult<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    res.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        .context(ServiceSnafu { operation })
}

pub struct AuditReview {
    config: ReviewConfig,
    snapshot: AuditSnapshot,
    reconciler: Option<StandardizationReconciler>,
    watcher: SampleSizeTaskWatcher,
    selector: SampleSizeSelector,
    preview: SamplePreviewWatcher,
    launched: Option<RoundRequest>,
}

impl AuditReview {
    pub fn new(snapshot: AuditSnapshot, config: ReviewConfig) -> AuditReview {
        let mut review = AuditReview {
            config,
            reconciler: None,
            snapshot,
            watcher: SampleSizeTaskWatcher::new(config.poll_interval),
            selector: SampleSizeSelector::default(),
            preview: SamplePreviewWatcher::default(),
            launched: None,
        };
        review.replace_snapshot(review.snapshot.clone());
        review
    }

    fn fetch<S: AuditService>(service: &mut S) -> AuditResult<AuditSnapshot> {
        let settings = call("get_settings", service.get_settings())?;
        let jurisdictions = call("get_jurisdictions", service.get_jurisdictions())?;
        let contests = call("get_contests", service.get_contests())?;
        let round = call("get_round", service.get_round())?;
        let standardizations = if settings.audit_type.uses_cvrs() {
            Some(call("get_standardizations", service.get_standardizations())?)
        } else {
            None
        };
        Ok(AuditSnapshot {
            settings,
            jurisdictions,
            contests,
            standardizations,
            round,
        })
    }

    /// Fetches a fresh snapshot and opens a session on it.
    pub fn load<S: AuditService>(service: &mut S, config: ReviewConfig) -> AuditResult<AuditReview> {
        let snapshot = AuditReview::fetch(service)?;
        Ok(AuditReview::new(snapshot, config))
    }

    /// Replaces the snapshot with a fresh one from the service.
    pub fn refresh<S: AuditService>(&mut self, service: &mut S) -> AuditResult<()> {
        let snapshot = AuditReview::fetch(service)?;
        self.replace_snapshot(snapshot);
        Ok(())
    }

    pub fn replace_snapshot(&mut self, snapshot: AuditSnapshot) {
        info!(
            "Audit {}: {} jurisdiction(s), {} contest(s), round {:?}",
            snapshot.settings.audit_name,
            snapshot.jurisdictions.len(),
            snapshot.contests.len(),
            snapshot.round.as_ref().map(|r| r.round_num)
        );
        self.reconciler = snapshot
            .standardizations
            .as_ref()
            .map(StandardizationReconciler::from_response);
        self.snapshot = snapshot;
        self.reevaluate();
    }

    fn reevaluate(&mut self) {
        self.watcher.update(&self.snapshot, self.reconciler.as_ref());
        self.selector.sync(&self.snapshot, &self.watcher);
        let sizes = self.selector.size_map(&self.snapshot);
        self.preview.retain_for(sizes.as_ref());
    }

    pub fn snapshot(&self) -> &AuditSnapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    pub fn reconciler(&self) -> Option<&StandardizationReconciler> {
        self.reconciler.as_ref()
    }

    pub fn watcher(&self) -> &SampleSizeTaskWatcher {
        &self.watcher
    }

    pub fn selector(&self) -> &SampleSizeSelector {
        &self.selector
    }

    pub fn preview(&self) -> &SamplePreviewWatcher {
        &self.preview
    }

    /// The request sent when the round was launched from this session.
    pub fn launched(&self) -> Option<&RoundRequest> {
        self.launched.as_ref()
    }

    fn sample_size_round(&self) -> u32 {
        match &self.snapshot.round {
            Some(round) => round.round_num,
            None => 1,
        }
    }

    /// Sends every request that is due. Returns the number of service calls.
    pub fn tick<S: AuditService>(&mut self, service: &mut S) -> AuditResult<usize> {
        let mut calls = 0;
        let requests = self.watcher.due_requests();
        if !requests.is_empty() {
            let request = SampleSizeRequest {
                round_num: self.sample_size_round(),
                // A launched round keeps its calculation.
                recompute: !self.snapshot.is_locked() && requests.iter().any(|r| r.recompute),
            };
            calls += 1;
            let response = match service.get_sample_size_options(request) {
                Ok(response) => response,
                Err(e) => {
                    for r in requests.iter() {
                        self.watcher.release(&r.ticket);
                    }
                    return call("get_sample_size_options", Err(e));
                }
            };
            for r in requests.iter() {
                let task = SampleSizeTask::from_response(&response, &r.ticket.contest_id);
                self.watcher.accept(&r.ticket, task);
            }
            self.reevaluate();
        }

        if let Some(request) = self.preview.due_request() {
            if let Some(sizes) = &request.compute {
                calls += 1;
                if let Err(e) = service.post_compute_sample_preview(sizes) {
                    self.preview.release(&request.ticket);
                    return call("post_compute_sample_preview", Err(e));
                }
            }
            calls += 1;
            match service.get_sample_preview() {
                Ok(preview) => {
                    self.preview.accept(&request.ticket, preview);
                }
                Err(e) => {
                    self.preview.release(&request.ticket);
                    return call("get_sample_preview", Err(e));
                }
            }
        }
        debug!("tick: {} service call(s)", calls);
        Ok(calls)
    }

    /// Ticks until nothing is loading any more, waiting `poll_interval`
    /// between ticks. Returns the number of ticks.
    pub fn drive<S: AuditService>(
        &mut self,
        service: &mut S,
        wait: &mut dyn FnMut(Duration),
    ) -> AuditResult<usize> {
        let mut ticks = 0;
        while ticks < self.config.max_ticks {
            self.tick(service)?;
            ticks += 1;
            if !self.watcher.is_loading() && !self.preview.is_drawing() {
                return Ok(ticks);
            }
            wait(self.config.poll_interval);
        }
        warn!(
            "Still waiting on the service after {} tick(s), giving up",
            ticks
        );
        Ok(ticks)
    }

    /// Records contest name resolutions and sends the whole mapping.
    pub fn submit_standardizations<S: AuditService>(
        &mut self,
        service: &mut S,
        update: &StandardizationUpdate,
    ) -> AuditResult<()> {
        let mut reconciler = self.reconciler.clone().unwrap_or_default();
        reconciler.apply(update)?;
        call(
            "put_standardizations",
            service.put_standardizations(&reconciler.to_update()),
        )?;
        let fresh = call("get_standardizations", service.get_standardizations())?;
        let mut snapshot = self.snapshot.clone();
        snapshot.standardizations = Some(fresh);
        self.replace_snapshot(snapshot);
        Ok(())
    }

    pub fn select_option(&mut self, contest_id: &str, key: &str) -> AuditResult<()> {
        self.selector.select_option(contest_id, key)?;
        self.reevaluate();
        Ok(())
    }

    pub fn select_custom(&mut self, contest_id: &str) -> AuditResult<()> {
        self.selector.select_custom(contest_id)?;
        self.reevaluate();
        Ok(())
    }

    pub fn edit_custom(&mut self, contest_id: &str, text: &str) -> AuditResult<()> {
        self.selector.edit_custom(contest_id, text)?;
        self.reevaluate();
        Ok(())
    }

    pub fn edit_custom_split(
        &mut self,
        contest_id: &str,
        cvr: &str,
        non_cvr: &str,
    ) -> AuditResult<()> {
        self.selector.edit_custom_split(contest_id, cvr, non_cvr)?;
        self.reevaluate();
        Ok(())
    }

    pub fn readiness(&self) -> LaunchReadiness {
        evaluate_launch_readiness(
            &self.snapshot,
            self.reconciler.as_ref(),
            &self.watcher,
            &self.selector,
        )
    }

    pub fn contest_reviews(&self) -> Vec<ContestReview> {
        review_contests(&self.snapshot, &self.watcher, &self.selector)
    }

    fn ready_sizes(&self) -> AuditResult<SampleSizeMap> {
        let readiness = self.readiness();
        if let Some(reason) = readiness.reason {
            return NotReadySnafu { reason }.fail();
        }
        // Ready implies a valid selection for every target contest.
        self.selector
            .size_map(&self.snapshot)
            .ok_or(AuditError::NotReady {
                reason: crate::BlockingReason::SampleSizesLoading,
            })
    }

    /// Starts drawing a preview of the sample for the current selections.
    pub fn preview_sample(&mut self) -> AuditResult<PreviewTicket> {
        let sizes = self.ready_sizes()?;
        Ok(self.preview.request(&sizes))
    }

    /// Launches the next round with the current selections.
    pub fn launch<S: AuditService>(&mut self, service: &mut S) -> AuditResult<RoundRequest> {
        ensure!(self.launched.is_none(), SelectionLockedSnafu {});
        let sizes = self.ready_sizes()?;
        let request = RoundRequest {
            round_num: self.snapshot.next_round_num(),
            sample_sizes: sizes,
        };
        validate_round_request(&self.snapshot, &self.selector, &request)?;
        call("start_next_round", service.start_next_round(&request))?;
        info!(
            "Launched round {} of audit {}",
            request.round_num, self.snapshot.settings.audit_name
        );
        self.launched = Some(request.clone());
        self.refresh(service)?;
        Ok(request)
    }
}
