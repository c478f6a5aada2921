//! The request that launches the next round.

use std::collections::BTreeSet;

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::config::*;
use crate::error::*;
use crate::selector::{SampleSizeSelector, SizeLimits};

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoundRequest {
    #[serde(rename = "roundNum")]
    pub round_num: u32,
    #[serde(rename = "sampleSizes")]
    pub sample_sizes: SampleSizeMap,
}

/// Checks a round request the way the audit service would before accepting
/// it. The first problem found is reported.
pub fn validate_round_request(
    snapshot: &AuditSnapshot,
    selector: &SampleSizeSelector,
    request: &RoundRequest,
) -> AuditResult<()> {
    let next_round = snapshot.next_round_num();
    ensure!(
        request.round_num == next_round,
        InvalidRoundRequestSnafu {
            message: format!("The next round should be round number {}", next_round)
        }
    );

    let targets = snapshot.target_contests();
    let target_ids: BTreeSet<&str> = targets.iter().map(|c| c.id.as_str()).collect();
    let given_ids: BTreeSet<&str> = request.sample_sizes.keys().map(|k| k.as_str()).collect();
    ensure!(
        target_ids == given_ids,
        InvalidRoundRequestSnafu {
            message: "Sample sizes provided do not match targeted contest ids"
        }
    );

    for contest in targets {
        let option = match request.sample_sizes.get(&contest.id) {
            Some(option) => option,
            None => continue,
        };
        if let OptionKey::Named(key) = &option.key {
            let known = selector
                .options(&contest.id)
                .map(|opts| opts.iter().any(|o| o.key == option.key))
                .unwrap_or(false);
            ensure!(
                known,
                InvalidRoundRequestSnafu {
                    message: format!(
                        "Invalid sample size key for contest {}: {}",
                        contest.name, key
                    )
                }
            );
        }
        let limits = SizeLimits::for_contest(snapshot, contest);
        ensure!(
            option.total() <= limits.total,
            InvalidRoundRequestSnafu {
                message: format!(
                    "Sample size for contest {} must be less than or equal to: {} (the total number of {} in the contest)",
                    contest.name, limits.total, limits.unit
                )
            }
        );
        debug!(
            "validate_round_request: contest {}: {:?} ok",
            contest.id, option
        );
    }
    Ok(())
}
