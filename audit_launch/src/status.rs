//! Upload and round progress of jurisdictions.

use log::debug;

use crate::config::*;

/// Progress of one jurisdiction, before and after the launch of a round.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum JurisdictionProgressStatus {
    UploadsNotStarted,
    UploadsInProgress,
    UploadsFailed,
    UploadsComplete,
    AuditNotStarted,
    AuditInProgress,
    AuditComplete,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct FileCounts {
    pub processed: usize,
    pub required: usize,
    pub errored: usize,
}

pub fn file_counts(jurisdiction: &Jurisdiction) -> FileCounts {
    let files = jurisdiction.required_files();
    let processed = files
        .iter()
        .filter(|f| f.status() == FileProcessingStatus::Processed)
        .count();
    let errored = files
        .iter()
        .filter(|f| f.status() == FileProcessingStatus::Errored)
        .count();
    FileCounts {
        processed,
        required: files.len(),
        errored,
    }
}

/// Reduces the files of a jurisdiction to a single progress status.
///
/// A failed upload dominates everything else. Once a round exists, the round
/// status replaces the upload status.
pub fn jurisdiction_status(jurisdiction: &Jurisdiction) -> JurisdictionProgressStatus {
    if let Some(round_status) = &jurisdiction.current_round_status {
        return match round_status.status {
            RoundStatus::NotStarted => JurisdictionProgressStatus::AuditNotStarted,
            RoundStatus::InProgress => JurisdictionProgressStatus::AuditInProgress,
            RoundStatus::Complete => JurisdictionProgressStatus::AuditComplete,
        };
    }
    let counts = file_counts(jurisdiction);
    let status = if counts.errored > 0 {
        JurisdictionProgressStatus::UploadsFailed
    } else if counts.processed == counts.required {
        JurisdictionProgressStatus::UploadsComplete
    } else if counts.processed > 0 {
        JurisdictionProgressStatus::UploadsInProgress
    } else {
        JurisdictionProgressStatus::UploadsNotStarted
    };
    debug!(
        "jurisdiction_status: {}: {:?} -> {:?}",
        jurisdiction.id, counts, status
    );
    status
}

/// True when every required file of the jurisdiction has been processed.
pub fn uploads_complete(jurisdiction: &Jurisdiction) -> bool {
    let counts = file_counts(jurisdiction);
    counts.processed == counts.required
}

/// Display rank of a jurisdiction: the higher, the further along.
pub fn jurisdiction_rank(jurisdiction: &Jurisdiction) -> i32 {
    match &jurisdiction.current_round_status {
        None => {
            let counts = file_counts(jurisdiction);
            if counts.errored > 0 {
                0
            } else if counts.processed == 0 {
                -1
            } else {
                counts.processed as i32
            }
        }
        Some(round_status) => match round_status.status {
            RoundStatus::NotStarted => 0,
            RoundStatus::InProgress => 1,
            RoundStatus::Complete => 2,
        },
    }
}

/// Sorts by ascending rank. Jurisdictions of equal rank keep their input order.
pub fn sort_by_rank(jurisdictions: &[Jurisdiction]) -> Vec<&Jurisdiction> {
    let mut sorted: Vec<&Jurisdiction> = jurisdictions.iter().collect();
    sorted.sort_by_key(|j| jurisdiction_rank(j));
    sorted
}

/// The short status text shown next to a jurisdiction.
pub fn status_label(audit_type: AuditType, jurisdiction: &Jurisdiction) -> String {
    let counts = file_counts(jurisdiction);
    let files_uploaded = format!("{}/{} files uploaded", counts.processed, counts.required);
    let ballot_polling = audit_type == AuditType::BallotPolling;
    match jurisdiction_status(jurisdiction) {
        JurisdictionProgressStatus::UploadsComplete if ballot_polling => {
            "Manifest uploaded".to_string()
        }
        JurisdictionProgressStatus::UploadsComplete => files_uploaded,
        JurisdictionProgressStatus::UploadsFailed if ballot_polling => {
            "Manifest upload failed".to_string()
        }
        JurisdictionProgressStatus::UploadsFailed => "Upload failed".to_string(),
        JurisdictionProgressStatus::UploadsInProgress => files_uploaded,
        JurisdictionProgressStatus::UploadsNotStarted if ballot_polling => {
            "No manifest uploaded".to_string()
        }
        JurisdictionProgressStatus::UploadsNotStarted => files_uploaded,
        JurisdictionProgressStatus::AuditNotStarted => "Not started".to_string(),
        JurisdictionProgressStatus::AuditInProgress => "In progress".to_string(),
        JurisdictionProgressStatus::AuditComplete => "Complete".to_string(),
    }
}

/// Number of jurisdictions done with the current phase, and the total.
pub fn count_complete(jurisdictions: &[Jurisdiction]) -> (usize, usize) {
    let complete = jurisdictions
        .iter()
        .filter(|j| match &j.current_round_status {
            None => uploads_complete(j),
            Some(round_status) => round_status.status == RoundStatus::Complete,
        })
        .count();
    (complete, jurisdictions.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(status: Option<FileProcessingStatus>) -> FileSlot {
        FileSlot {
            processing: status.map(|status| FileProcessing {
                status,
                error: None,
            }),
            ..FileSlot::default()
        }
    }

    fn jurisdiction(
        id: &str,
        manifest: Option<FileProcessingStatus>,
        tallies: Option<Option<FileProcessingStatus>>,
        cvrs: Option<Option<FileProcessingStatus>>,
    ) -> Jurisdiction {
        Jurisdiction {
            id: id.to_string(),
            name: format!("Jurisdiction {}", id),
            ballot_manifest: slot(manifest),
            batch_tallies: tallies.map(slot),
            cvrs: cvrs.map(slot),
            current_round_status: None,
        }
    }

    use FileProcessingStatus::*;

    #[test]
    fn all_processed_is_complete() {
        let j = jurisdiction("1", Some(Processed), Some(Some(Processed)), Some(Some(Processed)));
        assert_eq!(
            jurisdiction_status(&j),
            JurisdictionProgressStatus::UploadsComplete
        );
        let j = jurisdiction("2", Some(Processed), None, None);
        assert_eq!(
            jurisdiction_status(&j),
            JurisdictionProgressStatus::UploadsComplete
        );
    }

    #[test]
    fn failure_dominates() {
        let j = jurisdiction("1", Some(Processed), Some(Some(Errored)), Some(Some(Processed)));
        assert_eq!(
            jurisdiction_status(&j),
            JurisdictionProgressStatus::UploadsFailed
        );
        let j = jurisdiction("2", Some(Errored), Some(None), None);
        assert_eq!(
            jurisdiction_status(&j),
            JurisdictionProgressStatus::UploadsFailed
        );
        assert_eq!(jurisdiction_rank(&j), 0);
    }

    #[test]
    fn partial_and_missing_uploads() {
        let j = jurisdiction("1", Some(Processed), Some(Some(InProgress)), None);
        assert_eq!(
            jurisdiction_status(&j),
            JurisdictionProgressStatus::UploadsInProgress
        );
        assert_eq!(jurisdiction_rank(&j), 1);
        let j = jurisdiction("2", None, Some(None), None);
        assert_eq!(
            jurisdiction_status(&j),
            JurisdictionProgressStatus::UploadsNotStarted
        );
        assert_eq!(jurisdiction_rank(&j), -1);
        assert_eq!(status_label(AuditType::BatchComparison, &j), "0/2 files uploaded");
        assert_eq!(status_label(AuditType::BallotPolling, &j), "No manifest uploaded");
    }

    #[test]
    fn round_status_supersedes_uploads() {
        let mut j = jurisdiction("1", Some(Errored), None, None);
        j.current_round_status = Some(JurisdictionRoundStatus {
            status: RoundStatus::InProgress,
            num_samples: 11,
            num_unique: 10,
            num_samples_audited: 4,
            num_unique_audited: 3,
            num_discrepancies: None,
        });
        assert_eq!(
            jurisdiction_status(&j),
            JurisdictionProgressStatus::AuditInProgress
        );
        assert_eq!(jurisdiction_rank(&j), 1);
        assert_eq!(status_label(AuditType::BallotPolling, &j), "In progress");
        let rs = j.current_round_status.as_ref().unwrap();
        assert_eq!(rs.remaining(true), 7);
        assert_eq!(rs.remaining(false), 7);
    }

    #[test]
    fn sort_is_stable() {
        let js = vec![
            jurisdiction("a", Some(Processed), Some(Some(Processed)), None),
            jurisdiction("b", None, Some(None), None),
            jurisdiction("c", Some(Processed), Some(None), None),
            jurisdiction("d", Some(Errored), Some(None), None),
            jurisdiction("e", Some(Processed), Some(None), None),
            jurisdiction("f", None, Some(None), None),
        ];
        let ids: Vec<&str> = sort_by_rank(&js).iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "f", "d", "c", "e", "a"]);
        assert_eq!(count_complete(&js), (1, 6));
    }
}
