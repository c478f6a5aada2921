//! Sample previews: the per-jurisdiction sample a launch would draw.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::task_watcher::Acceptance;

pub const DRAWING_MESSAGE: &str = "Drawing a random sample of ballots...";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRow {
    pub name: String,
    #[serde(rename = "numSamples")]
    pub num_samples: u64,
    #[serde(rename = "numUnique")]
    pub num_unique: u64,
}

/// Response of the sample preview endpoint.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SamplePreview {
    pub jurisdictions: Option<Vec<PreviewRow>>,
    pub task: TaskInfo,
}

/// Sums of samples and unique samples over all rows.
pub fn totals(rows: &[PreviewRow]) -> (u64, u64) {
    rows.iter().fold((0, 0), |(samples, unique), row| {
        (samples + row.num_samples, unique + row.num_unique)
    })
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum PreviewState {
    Idle,
    Drawing,
    Ready(Vec<PreviewRow>),
    Errored(String),
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PreviewTicket {
    pub generation: u64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct PreviewRequest {
    pub ticket: PreviewTicket,
    /// Set when the preview still has to be computed for these sizes.
    pub compute: Option<SampleSizeMap>,
}

fn sizes_fingerprint(sizes: &SampleSizeMap) -> String {
    sha256::digest(format!("{:?}", sizes).as_str())
}

#[derive(PartialEq, Debug, Clone, Default)]
struct PreviewRun {
    generation: u64,
    sizes: SampleSizeMap,
    fingerprint: String,
    computed: bool,
    in_flight: bool,
}

/// Tracks the preview of the current sample sizes.
///
/// A preview belongs to the sizes it was requested for. Changing any
/// selection drops it, together with any answer still on its way.
#[derive(PartialEq, Debug, Clone)]
pub struct SamplePreviewWatcher {
    state: PreviewState,
    run: Option<PreviewRun>,
    next_generation: u64,
}

impl Default for SamplePreviewWatcher {
    fn default() -> Self {
        SamplePreviewWatcher {
            state: PreviewState::Idle,
            run: None,
            next_generation: 1,
        }
    }
}

impl SamplePreviewWatcher {
    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    /// Starts a preview for the given sizes.
    pub fn request(&mut self, sizes: &SampleSizeMap) -> PreviewTicket {
        let generation = self.next_generation;
        self.next_generation += 1;
        info!("Requesting a sample preview (generation {})", generation);
        self.run = Some(PreviewRun {
            generation,
            sizes: sizes.clone(),
            fingerprint: sizes_fingerprint(sizes),
            computed: false,
            in_flight: false,
        });
        self.state = PreviewState::Drawing;
        PreviewTicket { generation }
    }

    /// Drops the preview when the sizes it was drawn for are no longer the
    /// current ones.
    pub fn retain_for(&mut self, current: Option<&SampleSizeMap>) {
        let still_current = match (&self.run, current) {
            (Some(run), Some(sizes)) => run.fingerprint == sizes_fingerprint(sizes),
            (None, _) => return,
            (Some(_), None) => false,
        };
        if !still_current {
            debug!("retain_for: sample sizes changed, dropping the preview");
            self.run = None;
            self.state = PreviewState::Idle;
        }
    }

    pub fn due_request(&mut self) -> Option<PreviewRequest> {
        if self.state != PreviewState::Drawing {
            return None;
        }
        let run = self.run.as_mut()?;
        if run.in_flight {
            return None;
        }
        run.in_flight = true;
        Some(PreviewRequest {
            ticket: PreviewTicket {
                generation: run.generation,
            },
            compute: if run.computed {
                None
            } else {
                Some(run.sizes.clone())
            },
        })
    }

    fn current_run(&mut self, ticket: &PreviewTicket) -> Option<&mut PreviewRun> {
        self.run
            .as_mut()
            .filter(|run| run.generation == ticket.generation)
    }

    pub fn accept(&mut self, ticket: &PreviewTicket, preview: SamplePreview) -> Acceptance {
        let run = match self.current_run(ticket) {
            Some(run) => run,
            None => {
                warn!(
                    "Discarding stale sample preview (generation {})",
                    ticket.generation
                );
                return Acceptance::Discarded;
            }
        };
        run.in_flight = false;
        run.computed = true;
        self.state = match (preview.task.status, preview.jurisdictions) {
            (TaskStatus::Complete, Some(rows)) => {
                let (samples, unique) = totals(&rows);
                info!(
                    "Sample preview ready: {} samples, {} unique",
                    samples, unique
                );
                PreviewState::Ready(rows)
            }
            (TaskStatus::Errored, _) => {
                let message = preview
                    .task
                    .error
                    .unwrap_or_else(|| "Sample preview failed.".to_string());
                warn!("Sample preview failed: {}", message);
                PreviewState::Errored(message)
            }
            _ => PreviewState::Drawing,
        };
        Acceptance::Applied
    }

    pub fn release(&mut self, ticket: &PreviewTicket) {
        if let Some(run) = self.current_run(ticket) {
            run.in_flight = false;
        }
    }

    pub fn is_drawing(&self) -> bool {
        self.state == PreviewState::Drawing
    }
}
