use crate::config::*;
use crate::launch::RoundRequest;
use crate::preview::SamplePreview;

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct SampleSizeRequest {
    pub round_num: u32,
    /// Starts a new calculation instead of reading the current one.
    pub recompute: bool,
}

/// The audit service the review talks to.
///
/// Calls are blocking. Transport, authentication and retries are left to the
/// implementation.
pub trait AuditService {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get_settings(&mut self) -> Result<AuditSettings, Self::Error>;

    fn get_jurisdictions(&mut self) -> Result<Vec<Jurisdiction>, Self::Error>;

    fn get_contests(&mut self) -> Result<Vec<Contest>, Self::Error>;

    fn get_round(&mut self) -> Result<Option<RoundInfo>, Self::Error>;

    fn get_standardizations(&mut self) -> Result<ContestNameStandardizations, Self::Error>;

    fn put_standardizations(&mut self, update: &StandardizationUpdate)
        -> Result<(), Self::Error>;

    fn get_sample_size_options(
        &mut self,
        request: SampleSizeRequest,
    ) -> Result<SampleSizesResponse, Self::Error>;

    fn start_next_round(&mut self, request: &RoundRequest) -> Result<(), Self::Error>;

    fn post_compute_sample_preview(&mut self, sizes: &SampleSizeMap) -> Result<(), Self::Error>;

    fn get_sample_preview(&mut self) -> Result<SamplePreview, Self::Error>;
}
