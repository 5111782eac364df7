use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::core::lifecycle::{ClaimCommand, ClaimOutcome};
use crate::models::{
    Listing, ListingPatch, ListingPrecondition, MatchRequest, NewListing, NewMatchRequest,
    NewShortage, RequestPatch, Shortage,
};

/// Largest id list a single membership query may carry
pub const MAX_IN_QUERY_VALUES: usize = 10;

/// Errors surfaced by any listing store
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Repository call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Batch of {0} ids exceeds the limit of {MAX_IN_QUERY_VALUES}")]
    BatchTooLarge(usize),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Conflict,
    NotFound,
}

/// Result of inserting a request against a listing
#[derive(Debug, Clone, PartialEq)]
pub enum RequestInsert {
    Created(MatchRequest),
    /// The listing was claimed before the request could be stored
    ListingClaimed,
    ListingNotFound,
}

/// Change notification for live dashboards
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    ListingCreated(Listing),
    ListingUpdated(Listing),
    ListingDeleted(String),
    RequestCreated(MatchRequest),
    RequestUpdated(MatchRequest),
    ShortageReported(Shortage),
}

/// Store of listings, match requests and shortage reports
///
/// Timestamps and identifiers are assigned by the store. Conditional writes
/// report `Conflict` rather than overwriting.
#[async_trait]
pub trait ListingRepository: Send + Sync {
    /// Short name used in logs and health output
    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> Result<bool, RepositoryError>;

    /// Up to `limit` stored listings, newest first, claimed ones included
    async fn list_active(&self, limit: usize) -> Result<Vec<Listing>, RepositoryError>;

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>, RepositoryError>;

    async fn create_listing(&self, listing: NewListing) -> Result<Listing, RepositoryError>;

    /// Listings posted by `provider_id`, newest first
    async fn list_listings_by_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<Listing>, RepositoryError>;

    async fn get_match_request(&self, id: &str) -> Result<Option<MatchRequest>, RepositoryError>;

    /// Store a pending request, only while its listing is still available
    ///
    /// The availability check and the insert form one step, so a claim can
    /// never miss a request written against the listing it claims.
    async fn create_match_request(
        &self,
        request: NewMatchRequest,
    ) -> Result<RequestInsert, RepositoryError>;

    async fn update_listing(
        &self,
        id: &str,
        patch: ListingPatch,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError>;

    async fn update_match_request(
        &self,
        id: &str,
        patch: RequestPatch,
    ) -> Result<UpdateOutcome, RepositoryError>;

    /// Requests referencing any of `listing_ids`; at most [`MAX_IN_QUERY_VALUES`] ids
    async fn query_requests_by_listing_ids(
        &self,
        listing_ids: &[String],
    ) -> Result<Vec<MatchRequest>, RepositoryError>;

    async fn delete_listing(
        &self,
        id: &str,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError>;

    async fn create_shortage(&self, shortage: NewShortage) -> Result<Shortage, RepositoryError>;

    /// Up to `limit` shortage reports, newest first
    async fn list_shortages(&self, limit: usize) -> Result<Vec<Shortage>, RepositoryError>;

    /// Accept, claim and cascade-decline as one transaction
    ///
    /// Returns `None` when the store has no transactions; callers then fall
    /// back to a compensating sequence of single writes.
    async fn claim_atomically(
        &self,
        _command: &ClaimCommand,
    ) -> Result<Option<ClaimOutcome>, RepositoryError> {
        Ok(None)
    }

    /// Live change feed, when the store supports one
    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        None
    }
}

/// Reject id lists the store cannot take in one membership query
pub fn ensure_batch_size(listing_ids: &[String]) -> Result<(), RepositoryError> {
    if listing_ids.len() > MAX_IN_QUERY_VALUES {
        return Err(RepositoryError::BatchTooLarge(listing_ids.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_guard() {
        let ten: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert!(ensure_batch_size(&ten).is_ok());

        let eleven: Vec<String> = (0..11).map(|i| i.to_string()).collect();
        assert!(matches!(ensure_batch_size(&eleven), Err(RepositoryError::BatchTooLarge(11))));
    }
}
