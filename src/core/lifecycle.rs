//! Request-resolution state machine
//!
//! Pure transition checks shared by every repository adapter, so the in-memory
//! store, the PostgreSQL transaction and the saga all agree on when a claim or
//! a decline is allowed.

use chrono::{DateTime, Utc};
use crate::models::{Listing, MatchRequest, RequestStatus};

/// Instruction to claim a listing for one of its requests
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimCommand {
    pub request_id: String,
    pub listing_id: String,
    pub provider_id: String,
    pub at: DateTime<Utc>,
}

/// Why a claim was refused
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimRejection {
    ListingNotFound,
    RequestNotFound,
    RequestForOtherListing { actual_listing_id: String },
    NotListingOwner,
    ListingAlreadyClaimed { claimed_by: Option<String> },
    RequestNotPending(RequestStatus),
}

/// State after a successful claim
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimResult {
    pub listing: Listing,
    pub request: MatchRequest,
    pub declined: Vec<MatchRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(ClaimResult),
    Rejected(ClaimRejection),
}

/// Validate a claim against the current state of the listing and request
pub fn check_claim(
    command: &ClaimCommand,
    listing: Option<&Listing>,
    request: Option<&MatchRequest>,
) -> Result<(), ClaimRejection> {
    let listing = listing.ok_or(ClaimRejection::ListingNotFound)?;
    let request = request.ok_or(ClaimRejection::RequestNotFound)?;

    if request.food_entry_id != listing.id {
        return Err(ClaimRejection::RequestForOtherListing {
            actual_listing_id: request.food_entry_id.clone(),
        });
    }

    if !listing.is_owned_by(&command.provider_id) {
        return Err(ClaimRejection::NotListingOwner);
    }

    if listing.is_claimed() {
        return Err(ClaimRejection::ListingAlreadyClaimed {
            claimed_by: listing.claimed_by_request_id.clone(),
        });
    }

    if !request.is_pending() {
        return Err(ClaimRejection::RequestNotPending(request.status));
    }

    Ok(())
}

/// Pending requests on `listing_id` other than the accepted one
pub fn cascade_targets<'a, I>(listing_id: &str, accepted_request_id: &str, requests: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a MatchRequest>,
{
    requests
        .into_iter()
        .filter(|r| r.food_entry_id == listing_id && r.id != accepted_request_id && r.is_pending())
        .map(|r| r.id.clone())
        .collect()
}

/// What a decline should do to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineDecision {
    Apply,
    AlreadyDeclined,
    AlreadyAccepted,
}

pub fn check_decline(request: &MatchRequest) -> DeclineDecision {
    match request.status {
        RequestStatus::Pending => DeclineDecision::Apply,
        RequestStatus::Declined => DeclineDecision::AlreadyDeclined,
        RequestStatus::Accepted => DeclineDecision::AlreadyAccepted,
    }
}
