use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::core::distance::geohash_encode;
use crate::core::filters::{position_within_area, SearchArea};
use crate::core::lifecycle::{
    cascade_targets, check_claim, check_decline, ClaimCommand, ClaimOutcome, ClaimRejection,
    ClaimResult, DeclineDecision,
};
use crate::core::matcher::{Matcher, SearchResult};
use crate::models::{
    DuplicateRequestPolicy, Listing, ListingPatch, ListingPrecondition, ListingStatus,
    MatchRequest, NewListing, NewMatchRequest, NewShortage, Position, RequestPatch, RequestStatus,
    RequesterLocation, Shortage,
};
use crate::services::identity::Principal;
use crate::services::repository::{
    ChangeEvent, ListingRepository, RepositoryError, RequestInsert, UpdateOutcome,
    MAX_IN_QUERY_VALUES,
};

/// Errors returned by workflow operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(#[from] RepositoryError),

    /// Some writes of a multi-step sequence were applied, others were not
    #[error("Partial failure on listing {listing_id}: {message}")]
    PartialFailure {
        message: String,
        listing_id: String,
        request_id: Option<String>,
        unresolved_request_ids: Vec<String>,
    },
}

/// Tunables for the matching workflow
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub duplicate_policy: DuplicateRequestPolicy,
    pub repository_timeout: Duration,
    pub geohash_precision: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicateRequestPolicy::default(),
            repository_timeout: Duration::from_secs(10),
            geohash_precision: 9,
        }
    }
}

/// Fields a provider submits for a new listing
#[derive(Debug, Clone)]
pub struct ListingDraft {
    pub meals_available: u32,
    pub location: Position,
    pub address: String,
    pub description: String,
}

/// Shortage reports returned when the caller does not ask for a page size
pub const DEFAULT_SHORTAGE_PAGE: usize = 50;

/// Largest page of shortage reports one call returns
pub const MAX_SHORTAGE_PAGE: usize = 200;

/// Fields submitted when reporting that meals are needed
#[derive(Debug, Clone)]
pub struct ShortageDraft {
    pub meals_needed: u32,
    pub location: Position,
    pub address: String,
    pub description: String,
}

/// Requests the cascade step declined or failed to decline
#[derive(Debug, Default)]
struct CascadeReport {
    declined: Vec<MatchRequest>,
    failed: Vec<String>,
}

/// Orchestrates proximity search and the request lifecycle over a repository
#[derive(Clone)]
pub struct MatchingWorkflow {
    repository: Arc<dyn ListingRepository>,
    matcher: Matcher,
    settings: WorkflowSettings,
}

impl MatchingWorkflow {
    pub fn new(
        repository: Arc<dyn ListingRepository>,
        matcher: Matcher,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            repository,
            matcher,
            settings,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.repository.backend_name()
    }

    pub async fn health_check(&self) -> bool {
        self.call(self.repository.health_check()).await.unwrap_or(false)
    }

    /// Live change feed of the underlying store, if any
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        self.repository.subscribe()
    }

    /// Run a repository call under the configured timeout
    async fn call<T, F>(&self, operation: F) -> Result<T, RepositoryError>
    where
        F: Future<Output = Result<T, RepositoryError>>,
    {
        let timeout = self.settings.repository_timeout;
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Timeout(timeout)),
        }
    }

    /// Find unclaimed listings within `radius_km` of `origin`
    ///
    /// A non-positive radius yields an empty result without touching the store.
    pub async fn search(&self, origin: Position, radius_km: f64) -> Result<SearchResult, WorkflowError> {
        validate_position(&origin, "origin")?;
        if !radius_km.is_finite() {
            return Err(WorkflowError::Validation("radius must be a finite number".into()));
        }

        if self.matcher.effective_radius(radius_km).is_none() {
            tracing::debug!("Non-positive radius {}, returning no candidates", radius_km);
            return Ok(SearchResult::empty(radius_km));
        }

        let listings = self
            .call(self.repository.list_active(self.matcher.window()))
            .await?;

        let result = self.matcher.find_candidates(origin, radius_km, listings);

        tracing::info!(
            "Search at ({:.4}, {:.4}) within {}km matched {} of {} listings",
            origin.latitude,
            origin.longitude,
            result.radius_km,
            result.candidates.len(),
            result.total_scanned
        );

        Ok(result)
    }

    /// Post a new available listing owned by `principal`
    pub async fn create_listing(
        &self,
        principal: &Principal,
        draft: ListingDraft,
    ) -> Result<Listing, WorkflowError> {
        require_principal(principal)?;
        validate_position(&draft.location, "location")?;
        let address = non_empty(&draft.address, "address")?;
        let description = non_empty(&draft.description, "description")?;

        let listing = NewListing {
            meals_available: draft.meals_available,
            location: draft.location,
            address,
            description,
            provider_id: principal.user_id.clone(),
            geohash: geohash_encode(
                draft.location.latitude,
                draft.location.longitude,
                self.settings.geohash_precision,
            ),
        };

        let listing = self.call(self.repository.create_listing(listing)).await?;
        tracing::info!("Provider {} posted listing {}", principal.user_id, listing.id);
        Ok(listing)
    }

    /// Record that `principal` needs meals at a place
    pub async fn report_shortage(
        &self,
        principal: &Principal,
        draft: ShortageDraft,
    ) -> Result<Shortage, WorkflowError> {
        require_principal(principal)?;
        validate_position(&draft.location, "location")?;
        if draft.meals_needed == 0 {
            return Err(WorkflowError::Validation("meals needed must be positive".into()));
        }
        let address = non_empty(&draft.address, "address")?;
        let description = non_empty(&draft.description, "description")?;

        let shortage = NewShortage {
            meals_needed: draft.meals_needed,
            location: draft.location,
            address,
            description,
            reporter_id: principal.user_id.clone(),
            geohash: geohash_encode(
                draft.location.latitude,
                draft.location.longitude,
                self.settings.geohash_precision,
            ),
        };

        let shortage = self.call(self.repository.create_shortage(shortage)).await?;
        tracing::info!(
            "{} reported a shortage of {} meals ({})",
            principal.user_id,
            shortage.meals_needed,
            shortage.id
        );
        Ok(shortage)
    }

    /// Newest shortage reports, optionally only those within `radius_km` of an origin
    ///
    /// The page size is clamped to [`MAX_SHORTAGE_PAGE`]; the radius follows
    /// the same rules as a listing search.
    pub async fn list_shortages(
        &self,
        near: Option<(Position, f64)>,
        limit: Option<usize>,
    ) -> Result<Vec<Shortage>, WorkflowError> {
        let area = match near {
            None => None,
            Some((origin, radius_km)) => {
                validate_position(&origin, "origin")?;
                if !radius_km.is_finite() {
                    return Err(WorkflowError::Validation("radius must be a finite number".into()));
                }
                match self.matcher.effective_radius(radius_km) {
                    Some(radius_km) => Some(SearchArea::new(origin, radius_km)),
                    None => return Ok(Vec::new()),
                }
            }
        };

        let limit = limit.unwrap_or(DEFAULT_SHORTAGE_PAGE).clamp(1, MAX_SHORTAGE_PAGE);
        let shortages = self.call(self.repository.list_shortages(limit)).await?;

        Ok(match area {
            Some(area) => shortages
                .into_iter()
                .filter(|s| position_within_area(&s.location, &area))
                .collect(),
            None => shortages,
        })
    }

    /// Create a pending request from `principal` against a listing
    pub async fn request_listing(
        &self,
        principal: &Principal,
        listing_id: &str,
        requester_position: Position,
        requester_address: &str,
    ) -> Result<MatchRequest, WorkflowError> {
        require_principal(principal)?;
        let listing_id = non_empty(listing_id, "listing id")?;
        validate_position(&requester_position, "requester position")?;
        let address = non_empty(requester_address, "requester address")?;

        let listing = self
            .call(self.repository.get_listing(&listing_id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("listing {}", listing_id)))?;

        if listing.is_claimed() {
            return Err(WorkflowError::Conflict(format!(
                "listing {} has already been claimed",
                listing_id
            )));
        }

        if self.settings.duplicate_policy == DuplicateRequestPolicy::RejectPending {
            let existing = self
                .call(self.repository.query_requests_by_listing_ids(&[listing_id.clone()]))
                .await?;
            if existing
                .iter()
                .any(|r| r.requester_id == principal.user_id && r.is_pending())
            {
                return Err(WorkflowError::Conflict(format!(
                    "a pending request for listing {} already exists",
                    listing_id
                )));
            }
        }

        let request = NewMatchRequest {
            food_entry_id: listing_id.clone(),
            requester_id: principal.user_id.clone(),
            requester_location: RequesterLocation {
                lat: requester_position.latitude,
                lng: requester_position.longitude,
                address,
            },
        };

        let request = match self.call(self.repository.create_match_request(request)).await? {
            RequestInsert::Created(request) => request,
            RequestInsert::ListingClaimed => {
                return Err(WorkflowError::Conflict(format!(
                    "listing {} was claimed before the request was stored",
                    listing_id
                )))
            }
            RequestInsert::ListingNotFound => {
                return Err(WorkflowError::NotFound(format!("listing {}", listing_id)))
            }
        };
        tracing::info!(
            "Requester {} requested listing {} (request {})",
            principal.user_id,
            request.food_entry_id,
            request.id
        );
        Ok(request)
    }

    /// Accept a request, claim its listing and decline every competing request
    ///
    /// The claim only succeeds while the listing is still available. Stores
    /// with transactions do all three steps at once; others go through a
    /// compensating sequence that reports `PartialFailure` when it cannot
    /// restore a consistent state.
    pub async fn accept_request(
        &self,
        principal: &Principal,
        request_id: &str,
        listing_id: &str,
    ) -> Result<ClaimResult, WorkflowError> {
        require_principal(principal)?;
        let command = ClaimCommand {
            request_id: non_empty(request_id, "request id")?,
            listing_id: non_empty(listing_id, "listing id")?,
            provider_id: principal.user_id.clone(),
            at: Utc::now(),
        };

        let result = match self.call(self.repository.claim_atomically(&command)).await? {
            Some(ClaimOutcome::Claimed(result)) => result,
            Some(ClaimOutcome::Rejected(rejection)) => {
                return Err(rejection_error(rejection, &command))
            }
            None => self.claim_with_compensation(&command).await?,
        };

        tracing::info!(
            "Request {} accepted, listing {} claimed, {} competing requests declined",
            result.request.id,
            result.listing.id,
            result.declined.len()
        );
        Ok(result)
    }

    async fn claim_with_compensation(&self, command: &ClaimCommand) -> Result<ClaimResult, WorkflowError> {
        let listing = self.call(self.repository.get_listing(&command.listing_id)).await?;
        let request = self.call(self.repository.get_match_request(&command.request_id)).await?;

        if let Err(rejection) = check_claim(command, listing.as_ref(), request.as_ref()) {
            return Err(rejection_error(rejection, command));
        }
        let (Some(mut listing), Some(mut request)) = (listing, request) else {
            return Err(WorkflowError::NotFound(format!("request {}", command.request_id)));
        };

        // Step 1: exclusive claim, only while the listing is still available
        let claim = ListingPatch::claim(&command.request_id, command.at);
        let claimed = self
            .call(self.repository.update_listing(
                &command.listing_id,
                claim.clone(),
                Some(ListingPrecondition::StatusIs(ListingStatus::Available)),
            ))
            .await?;
        match claimed {
            UpdateOutcome::Applied => claim.apply(&mut listing),
            UpdateOutcome::Conflict => {
                return Err(WorkflowError::Conflict(format!(
                    "listing {} was claimed concurrently",
                    command.listing_id
                )))
            }
            UpdateOutcome::NotFound => {
                return Err(WorkflowError::NotFound(format!("listing {}", command.listing_id)))
            }
        }

        // Step 2: accept the request, releasing the claim if that fails
        let accept = RequestPatch::new(RequestStatus::Accepted, command.at);
        let accepted = self
            .call(self.repository.update_match_request(&command.request_id, accept))
            .await;
        let failure = match accepted {
            Ok(UpdateOutcome::Applied) => None,
            Ok(_) => Some(WorkflowError::NotFound(format!("request {}", command.request_id))),
            Err(e) => Some(WorkflowError::RepositoryUnavailable(e)),
        };
        if let Some(failure) = failure {
            return Err(self.release_claim(command, failure).await);
        }
        accept.apply(&mut request);

        // Step 3: decline the competitors
        let report = self
            .cascade_decline(&command.listing_id, &command.request_id, command.at)
            .await?;
        if !report.failed.is_empty() {
            tracing::error!(
                "Listing {} claimed by {} but {} requests could not be declined: {:?}",
                command.listing_id,
                command.request_id,
                report.failed.len(),
                report.failed
            );
            return Err(WorkflowError::PartialFailure {
                message: "competing requests are still pending; reconcile the listing".into(),
                listing_id: command.listing_id.clone(),
                request_id: Some(command.request_id.clone()),
                unresolved_request_ids: report.failed,
            });
        }

        Ok(ClaimResult {
            listing,
            request,
            declined: report.declined,
        })
    }

    /// Undo a claim whose accept step failed
    async fn release_claim(&self, command: &ClaimCommand, cause: WorkflowError) -> WorkflowError {
        let released = self
            .call(self.repository.update_listing(
                &command.listing_id,
                ListingPatch::release(),
                Some(ListingPrecondition::ClaimedBy(command.request_id.clone())),
            ))
            .await;

        match released {
            Ok(UpdateOutcome::Applied) => {
                tracing::warn!(
                    "Released claim on listing {} after accept failed: {}",
                    command.listing_id,
                    cause
                );
                cause
            }
            other => {
                tracing::error!(
                    "Listing {} left claimed by {} after accept failed ({}); release result: {:?}",
                    command.listing_id,
                    command.request_id,
                    cause,
                    other
                );
                WorkflowError::PartialFailure {
                    message: format!("accept failed ({}) and the claim could not be released", cause),
                    listing_id: command.listing_id.clone(),
                    request_id: Some(command.request_id.clone()),
                    unresolved_request_ids: vec![command.request_id.clone()],
                }
            }
        }
    }

    /// Decline every pending request on `listing_id` except `accepted_request_id`
    async fn cascade_decline(
        &self,
        listing_id: &str,
        accepted_request_id: &str,
        at: DateTime<Utc>,
    ) -> Result<CascadeReport, WorkflowError> {
        let requests = self
            .requests_for_listings(&[listing_id.to_string()])
            .await
            .map_err(|e| WorkflowError::PartialFailure {
                message: format!("could not look up competing requests: {}", e),
                listing_id: listing_id.to_string(),
                request_id: Some(accepted_request_id.to_string()),
                unresolved_request_ids: Vec::new(),
            })?;

        let targets: HashSet<String> = cascade_targets(listing_id, accepted_request_id, &requests)
            .into_iter()
            .collect();
        let decline = RequestPatch::new(RequestStatus::Declined, at);
        let mut report = CascadeReport::default();

        for mut request in requests.into_iter().filter(|r| targets.contains(&r.id)) {
            match self
                .call(self.repository.update_match_request(&request.id, decline))
                .await
            {
                Ok(UpdateOutcome::Applied) => {
                    decline.apply(&mut request);
                    report.declined.push(request);
                }
                // Deleted in the meantime, nothing left to decline
                Ok(UpdateOutcome::NotFound) => {}
                Ok(UpdateOutcome::Conflict) | Err(_) => report.failed.push(request.id),
            }
        }

        Ok(report)
    }

    /// Retry the cascade-decline step for a claimed listing
    ///
    /// Safe to call repeatedly; returns the ids declined by this call.
    pub async fn reconcile_listing(
        &self,
        principal: &Principal,
        listing_id: &str,
    ) -> Result<Vec<String>, WorkflowError> {
        require_principal(principal)?;
        let listing = self.owned_listing(principal, listing_id).await?;

        let accepted_request_id = match (&listing.status, &listing.claimed_by_request_id) {
            (ListingStatus::Claimed, Some(request_id)) => request_id.clone(),
            _ => {
                return Err(WorkflowError::Conflict(format!(
                    "listing {} is not claimed",
                    listing_id
                )))
            }
        };

        let report = self
            .cascade_decline(&listing.id, &accepted_request_id, Utc::now())
            .await?;

        if !report.failed.is_empty() {
            return Err(WorkflowError::PartialFailure {
                message: "some competing requests are still pending".into(),
                listing_id: listing.id,
                request_id: Some(accepted_request_id),
                unresolved_request_ids: report.failed,
            });
        }

        let declined: Vec<String> = report.declined.into_iter().map(|r| r.id).collect();
        tracing::info!("Reconciled listing {}, declined {:?}", listing_id, declined);
        Ok(declined)
    }

    /// Decline a pending request; declining twice is a no-op
    pub async fn decline_request(
        &self,
        principal: &Principal,
        request_id: &str,
    ) -> Result<MatchRequest, WorkflowError> {
        require_principal(principal)?;
        let request_id = non_empty(request_id, "request id")?;

        let mut request = self
            .call(self.repository.get_match_request(&request_id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("request {}", request_id)))?;

        // Without its listing nobody can prove ownership; deletes decline leftovers
        let listing = self
            .call(self.repository.get_listing(&request.food_entry_id))
            .await?
            .ok_or_else(|| {
                WorkflowError::Forbidden(format!(
                    "listing {} no longer exists",
                    request.food_entry_id
                ))
            })?;
        if !listing.is_owned_by(&principal.user_id) {
            return Err(WorkflowError::Forbidden(format!(
                "listing {} belongs to another provider",
                listing.id
            )));
        }

        match check_decline(&request) {
            DeclineDecision::AlreadyDeclined => {
                tracing::debug!("Request {} already declined", request_id);
                Ok(request)
            }
            DeclineDecision::AlreadyAccepted => Err(WorkflowError::Conflict(format!(
                "request {} has already been accepted",
                request_id
            ))),
            DeclineDecision::Apply => {
                let decline = RequestPatch::new(RequestStatus::Declined, Utc::now());
                match self
                    .call(self.repository.update_match_request(&request_id, decline))
                    .await?
                {
                    UpdateOutcome::Applied => {
                        decline.apply(&mut request);
                        tracing::info!("Request {} declined", request_id);
                        Ok(request)
                    }
                    UpdateOutcome::NotFound => {
                        Err(WorkflowError::NotFound(format!("request {}", request_id)))
                    }
                    UpdateOutcome::Conflict => Err(WorkflowError::Conflict(format!(
                        "request {} changed concurrently",
                        request_id
                    ))),
                }
            }
        }
    }

    /// Delete a listing that has not been claimed
    pub async fn delete_listing(
        &self,
        principal: &Principal,
        listing_id: &str,
    ) -> Result<(), WorkflowError> {
        require_principal(principal)?;
        let listing = self.owned_listing(principal, listing_id).await?;

        let outcome = self
            .call(self.repository.delete_listing(
                &listing.id,
                Some(ListingPrecondition::StatusIs(ListingStatus::Available)),
            ))
            .await?;

        match outcome {
            UpdateOutcome::Applied => {
                let declined = self.decline_orphaned_requests(&listing.id).await;
                tracing::info!(
                    "Listing {} deleted by {}, {} pending requests declined",
                    listing.id,
                    principal.user_id,
                    declined.len()
                );
                Ok(())
            }
            UpdateOutcome::Conflict => Err(WorkflowError::Conflict(format!(
                "listing {} has been claimed and cannot be deleted",
                listing.id
            ))),
            UpdateOutcome::NotFound => Err(WorkflowError::NotFound(format!("listing {}", listing.id))),
        }
    }

    /// Decline the pending requests left on a deleted listing
    ///
    /// The delete has already happened, so failures are logged and skipped.
    async fn decline_orphaned_requests(&self, listing_id: &str) -> Vec<String> {
        let requests = match self.requests_for_listings(&[listing_id.to_string()]).await {
            Ok(requests) => requests,
            Err(e) => {
                tracing::warn!("Could not look up requests of deleted listing {}: {}", listing_id, e);
                return Vec::new();
            }
        };

        let decline = RequestPatch::new(RequestStatus::Declined, Utc::now());
        let mut declined = Vec::new();
        for request in requests.iter().filter(|r| r.is_pending()) {
            match self
                .call(self.repository.update_match_request(&request.id, decline))
                .await
            {
                Ok(UpdateOutcome::Applied) => declined.push(request.id.clone()),
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    "Request {} on deleted listing {} left pending: {}",
                    request.id,
                    listing_id,
                    e
                ),
            }
        }
        declined
    }

    /// The provider's listings and every request referencing them
    pub async fn provider_dashboard(
        &self,
        principal: &Principal,
    ) -> Result<(Vec<Listing>, Vec<MatchRequest>), WorkflowError> {
        require_principal(principal)?;

        let listings = self
            .call(self.repository.list_listings_by_provider(&principal.user_id))
            .await?;
        let ids: Vec<String> = listings.iter().map(|l| l.id.clone()).collect();
        let requests = self.requests_for_listings(&ids).await?;

        tracing::debug!(
            "Dashboard for {}: {} listings, {} requests",
            principal.user_id,
            listings.len(),
            requests.len()
        );

        Ok((listings, requests))
    }

    /// Requests referencing any of `listing_ids`, newest first
    ///
    /// Issues one store query per batch of at most ten ids and drops duplicate
    /// request ids from the merged result.
    pub async fn requests_for_listings(
        &self,
        listing_ids: &[String],
    ) -> Result<Vec<MatchRequest>, WorkflowError> {
        let mut seen_ids = HashSet::new();
        let unique_ids: Vec<String> = listing_ids
            .iter()
            .filter(|id| seen_ids.insert(id.as_str()))
            .cloned()
            .collect();

        let mut seen_requests = HashSet::new();
        let mut merged = Vec::new();

        for batch in unique_ids.chunks(MAX_IN_QUERY_VALUES) {
            let requests = self
                .call(self.repository.query_requests_by_listing_ids(batch))
                .await?;
            merged.extend(
                requests
                    .into_iter()
                    .filter(|r| seen_requests.insert(r.id.clone())),
            );
        }

        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(merged)
    }

    /// Load a listing and make sure `principal` may manage it
    async fn owned_listing(&self, principal: &Principal, listing_id: &str) -> Result<Listing, WorkflowError> {
        let listing_id = non_empty(listing_id, "listing id")?;
        let listing = self
            .call(self.repository.get_listing(&listing_id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("listing {}", listing_id)))?;

        if !listing.is_owned_by(&principal.user_id) {
            return Err(WorkflowError::Forbidden(format!(
                "listing {} belongs to another provider",
                listing_id
            )));
        }

        Ok(listing)
    }
}

fn require_principal(principal: &Principal) -> Result<(), WorkflowError> {
    if principal.user_id.trim().is_empty() {
        return Err(WorkflowError::Unauthorized);
    }
    Ok(())
}

fn validate_position(position: &Position, field: &str) -> Result<(), WorkflowError> {
    if !position.is_valid() {
        return Err(WorkflowError::Validation(format!(
            "{} must have latitude in [-90, 90] and longitude in [-180, 180]",
            field
        )));
    }
    Ok(())
}

fn non_empty(value: &str, field: &str) -> Result<String, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn rejection_error(rejection: ClaimRejection, command: &ClaimCommand) -> WorkflowError {
    match rejection {
        ClaimRejection::ListingNotFound => {
            WorkflowError::NotFound(format!("listing {}", command.listing_id))
        }
        ClaimRejection::RequestNotFound => {
            WorkflowError::NotFound(format!("request {}", command.request_id))
        }
        ClaimRejection::RequestForOtherListing { actual_listing_id } => {
            WorkflowError::Validation(format!(
                "request {} references listing {}, not {}",
                command.request_id, actual_listing_id, command.listing_id
            ))
        }
        ClaimRejection::NotListingOwner => WorkflowError::Forbidden(format!(
            "listing {} belongs to another provider",
            command.listing_id
        )),
        ClaimRejection::ListingAlreadyClaimed { claimed_by } => WorkflowError::Conflict(format!(
            "listing {} is already claimed by request {}",
            command.listing_id,
            claimed_by.as_deref().unwrap_or("unknown")
        )),
        ClaimRejection::RequestNotPending(status) => WorkflowError::Conflict(format!(
            "request {} is {}, not pending",
            command.request_id,
            status.as_str()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryRepository;

    fn provider() -> Principal {
        Principal::new("provider-1")
    }

    fn workflow() -> MatchingWorkflow {
        MatchingWorkflow::new(
            Arc::new(MemoryRepository::new()),
            Matcher::default(),
            WorkflowSettings::default(),
        )
    }

    fn draft(lat: f64, lon: f64) -> ListingDraft {
        ListingDraft {
            meals_available: 8,
            location: Position::new(lat, lon),
            address: "100 Pine St".to_string(),
            description: "Pasta trays".to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_rejects_invalid_origin() {
        let wf = workflow();
        let result = wf.search(Position::new(120.0, 0.0), 10.0).await;
        assert!(matches!(result, Err(WorkflowError::Validation(_))));

        let result = wf.search(Position::new(40.0, -75.0), f64::NAN).await;
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_listing_requires_principal_and_fields() {
        let wf = workflow();

        let anonymous = Principal::new("  ");
        assert!(matches!(
            wf.create_listing(&anonymous, draft(40.0, -75.0)).await,
            Err(WorkflowError::Unauthorized)
        ));

        let mut blank = draft(40.0, -75.0);
        blank.description = "   ".to_string();
        assert!(matches!(
            wf.create_listing(&provider(), blank).await,
            Err(WorkflowError::Validation(_))
        ));

        let listing = wf.create_listing(&provider(), draft(40.0, -75.0)).await.unwrap();
        assert_eq!(listing.provider_id.as_deref(), Some("provider-1"));
        assert_eq!(listing.geohash.as_deref().map(str::len), Some(9));
        assert_eq!(listing.status, ListingStatus::Available);
    }

    #[tokio::test]
    async fn test_duplicate_pending_request_rejected() {
        let wf = workflow();
        let listing = wf.create_listing(&provider(), draft(40.0, -75.0)).await.unwrap();
        let requester = Principal::new("requester-1");
        let position = Position::new(40.01, -75.01);

        wf.request_listing(&requester, &listing.id, position, "Shelter").await.unwrap();
        let second = wf.request_listing(&requester, &listing.id, position, "Shelter").await;
        assert!(matches!(second, Err(WorkflowError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_duplicate_allowed_by_policy() {
        let wf = MatchingWorkflow::new(
            Arc::new(MemoryRepository::new()),
            Matcher::default(),
            WorkflowSettings {
                duplicate_policy: DuplicateRequestPolicy::Allow,
                ..WorkflowSettings::default()
            },
        );
        let listing = wf.create_listing(&provider(), draft(40.0, -75.0)).await.unwrap();
        let requester = Principal::new("requester-1");
        let position = Position::new(40.01, -75.01);

        let first = wf.request_listing(&requester, &listing.id, position, "Shelter").await.unwrap();
        let second = wf.request_listing(&requester, &listing.id, position, "Shelter").await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_accept_by_other_provider_forbidden() {
        let wf = workflow();
        let listing = wf.create_listing(&provider(), draft(40.0, -75.0)).await.unwrap();
        let request = wf
            .request_listing(&Principal::new("r"), &listing.id, Position::new(40.0, -75.0), "Here")
            .await
            .unwrap();

        let result = wf
            .accept_request(&Principal::new("someone-else"), &request.id, &listing.id)
            .await;
        assert!(matches!(result, Err(WorkflowError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_report_and_list_shortages_near_origin() {
        let wf = workflow();
        let shelter = Principal::new("shelter-1");

        for (lat, lon) in [(40.0, -75.0), (40.01, -75.01), (41.0, -75.0)] {
            wf.report_shortage(
                &shelter,
                ShortageDraft {
                    meals_needed: 20,
                    location: Position::new(lat, lon),
                    address: "Shelter".to_string(),
                    description: "Dinner".to_string(),
                },
            )
            .await
            .unwrap();
        }

        let all = wf.list_shortages(None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].location, Position::new(41.0, -75.0));
        assert_eq!(all[0].reporter_id.as_deref(), Some("shelter-1"));

        let near = wf
            .list_shortages(Some((Position::new(40.0, -75.0), 5.0)), None)
            .await
            .unwrap();
        assert_eq!(near.len(), 2);

        let none = wf
            .list_shortages(Some((Position::new(40.0, -75.0), 0.0)), None)
            .await
            .unwrap();
        assert!(none.is_empty());

        let page = wf.list_shortages(None, Some(1)).await.unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_report_shortage_validation() {
        let wf = workflow();
        let draft = ShortageDraft {
            meals_needed: 0,
            location: Position::new(40.0, -75.0),
            address: "Shelter".to_string(),
            description: "Dinner".to_string(),
        };

        assert!(matches!(
            wf.report_shortage(&Principal::new(""), draft.clone()).await,
            Err(WorkflowError::Unauthorized)
        ));
        assert!(matches!(
            wf.report_shortage(&Principal::new("shelter-1"), draft).await,
            Err(WorkflowError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_requires_claimed_listing() {
        let wf = workflow();
        let listing = wf.create_listing(&provider(), draft(40.0, -75.0)).await.unwrap();

        let result = wf.reconcile_listing(&provider(), &listing.id).await;
        assert!(matches!(result, Err(WorkflowError::Conflict(_))));
    }
}
